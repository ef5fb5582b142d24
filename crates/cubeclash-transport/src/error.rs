use std::net::SocketAddr;

use crate::LinkId;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The listening socket could not be opened.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// `listen` or `connect` was called while the binding is already in use.
    #[error("transport binding is already active")]
    AlreadyActive,

    /// The link was closed or never existed.
    #[error("unknown link {0}")]
    UnknownLink(LinkId),

    /// Handing data to the link's writer failed.
    #[error("send failed: {0}")]
    SendFailed(String),
}
