//! Error types for the session layer.

use std::net::SocketAddrV4;
use std::time::Duration;

use cubeclash_protocol::{ConnectionId, ProtocolError};
use cubeclash_transport::TransportError;

/// Errors surfaced while starting, running, or stopping a session.
///
/// None of these are fatal to the process: the caller turns them into a
/// status line and a return to the lobby.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// The join address is not a dotted-quad IPv4. Raised before any I/O.
    #[error("invalid address {0:?}: expected four numbers 0-255 separated by dots")]
    InvalidAddress(String),

    /// The host could not open its listening port.
    #[error("could not host on port {port}: {source}")]
    BindError {
        port: u16,
        #[source]
        source: TransportError,
    },

    /// The client could not start connecting.
    #[error("could not connect to {addr}: {source}")]
    ConnectError {
        addr: SocketAddrV4,
        #[source]
        source: TransportError,
    },

    /// The host did not answer within the connection window.
    #[error("no connection to host after {}s", .0.as_secs())]
    ConnectionTimeout(Duration),

    /// The host turned the connection down during the handshake.
    #[error("connection refused: {0}")]
    Refused(String),

    /// `start_host`/`start_client` while a session is running.
    #[error("a session is already running")]
    AlreadyActive,

    /// No established connection with that id.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
