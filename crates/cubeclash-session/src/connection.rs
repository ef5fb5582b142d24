//! Session types: roles, connections, configuration, and events.

use std::fmt;
use std::net::{Ipv4Addr, UdpSocket};
use std::time::Duration;

use cubeclash_protocol::{ConnectionId, PROTOCOL_VERSION, WireMessage};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Port the host listens on and the client connects to.
    pub port: u16,

    /// Pause between connection attempts while the host is unreachable.
    pub connect_retry_interval: Duration,

    /// Version sent in `ConnectRequest`. The host refuses any other.
    pub protocol_version: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: 7777,
            connect_retry_interval: Duration::from_secs(1),
            protocol_version: PROTOCOL_VERSION,
        }
    }
}

// ---------------------------------------------------------------------------
// Roles and connections
// ---------------------------------------------------------------------------

/// Which side of the session a process (or connection) is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionRole {
    /// Listens, owns the authority connection.
    Host,
    /// Joined a host by address.
    Client,
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// One participant as seen from this process.
///
/// Exactly one connection per session has `role == Host`; it is the
/// authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub id: ConnectionId,
    pub role: SessionRole,
    /// `true` for this process's own connection.
    pub is_local: bool,
}

impl Connection {
    pub fn is_authority(&self) -> bool {
        self.role == SessionRole::Host
    }
}

/// Where a host can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalEndpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl LocalEndpoint {
    /// Endpoint on this machine's LAN address.
    pub(crate) fn on_lan(port: u16) -> Self {
        Self {
            address: lan_address(),
            port,
        }
    }
}

impl fmt::Display for LocalEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Best-effort LAN IPv4 address of this machine.
///
/// "Connecting" a UDP socket sends nothing; it only makes the OS choose the
/// outgoing interface. Falls back to loopback when there is no route.
fn lan_address() -> Ipv4Addr {
    let probe = || -> std::io::Result<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
        match socket.local_addr()?.ip() {
            std::net::IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
            _ => Err(std::io::ErrorKind::AddrNotAvailable.into()),
        }
    };
    probe().unwrap_or(Ipv4Addr::LOCALHOST)
}

// ---------------------------------------------------------------------------
// SessionEvent
// ---------------------------------------------------------------------------

/// Something that happened to the session, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The host is listening.
    ServerStarted(LocalEndpoint),

    /// The host stopped listening.
    ServerStopped,

    /// A connection finished its handshake. `is_local` is set for this
    /// process's own connection.
    ConnectionEstablished {
        connection: ConnectionId,
        is_local: bool,
    },

    /// A connection went away. For the local connection this means the
    /// whole session is gone.
    ConnectionLost {
        connection: ConnectionId,
        is_local: bool,
    },

    /// The host refused this client during the handshake.
    ConnectionRefused { reason: String },

    /// A message from an established connection.
    Message {
        from: ConnectionId,
        message: WireMessage,
    },
}
