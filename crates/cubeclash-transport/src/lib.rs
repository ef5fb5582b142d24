//! Transport binding layer for Cubeclash.
//!
//! The session layer never touches sockets. It talks to a
//! [`TransportBinding`], which can listen (host role), connect (client
//! role), send opaque byte messages over a link, and close. Everything the
//! network does on its own (a peer connecting, a message arriving, a link
//! dropping) is reported as a [`TransportEvent`] pushed into the
//! [`EventSender`] handed over at `listen`/`connect` time.
//!
//! That queue is the only thing that crosses threads: I/O tasks enqueue
//! events, the single processing task drains them.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket binding via `tokio-tungstenite`

mod error;
mod memory;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
pub use memory::{MemoryBinding, MemoryNetwork};
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketBinding, WebSocketConfig};

use std::fmt;
use std::future::Future;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

/// Counter for generating process-unique link IDs.
static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for one transport-level link to a peer.
///
/// Link IDs are local to the process that created them; the session layer
/// maps them to the host-assigned connection identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    /// Creates a new `LinkId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates a fresh, never-before-used link ID.
    pub fn next() -> Self {
        Self(NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Something the network did that the processing task must react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A link is up. On the host this is an accepted peer, on the client
    /// it is the outbound link to the host.
    Connected {
        link: LinkId,
        peer: Option<SocketAddr>,
    },
    /// A link went away (closed by either side or broken).
    Disconnected { link: LinkId },
    /// A complete message arrived on a link.
    Message { link: LinkId, data: Vec<u8> },
}

/// Sending half of the inbound event queue.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of the inbound event queue.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Creates a fresh inbound event queue.
pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// The connection primitive the session layer is built on.
///
/// A binding is either idle, listening, or connecting/connected. `close`
/// returns it to idle so it can be reused for the next session.
pub trait TransportBinding: Send + 'static {
    /// Starts accepting peers on `port` (all interfaces). Returns the
    /// address actually bound, which matters when `port` is 0.
    fn listen(
        &mut self,
        port: u16,
        events: EventSender,
    ) -> impl Future<Output = Result<SocketAddr, TransportError>> + Send;

    /// Starts connecting to a host. Returns as soon as the attempt is
    /// underway; success is reported later as [`TransportEvent::Connected`].
    fn connect(
        &mut self,
        addr: SocketAddrV4,
        events: EventSender,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Queues `data` for delivery over `link`. Never blocks.
    fn send(&self, link: LinkId, data: Vec<u8>) -> Result<(), TransportError>;

    /// Closes a single link.
    fn close_link(&self, link: LinkId);

    /// Stops listening/connecting and closes every link.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
