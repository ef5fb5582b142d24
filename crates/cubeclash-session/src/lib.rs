//! Session management for Cubeclash.
//!
//! This crate owns the transport lifecycle for one process:
//!
//! 1. **Address validation**: [`is_valid_address`] / [`parse_address`]
//!    reject anything that isn't a dotted-quad IPv4 before touching the
//!    network.
//! 2. **Session start/stop**: [`SessionManager::start_host`],
//!    [`SessionManager::start_client`], [`SessionManager::shutdown`].
//! 3. **Handshake and registry**: links become [`Connection`]s with a
//!    stable [`ConnectionId`](cubeclash_protocol::ConnectionId) assigned by
//!    the host.
//! 4. **Events**: everything above is reported as a [`SessionEvent`] from
//!    [`SessionManager::next_event`], consumed by the single processing task.
//!
//! # How it fits in the stack
//!
//! ```text
//! Match / Replication (above)  ← react to SessionEvents, send WireMessages
//!     ↕
//! Session Layer (this crate)   ← roles, handshake, connection ids
//!     ↕
//! Transport (below)            ← links and raw bytes
//! ```

mod address;
mod connection;
mod error;
mod manager;

pub use address::{is_valid_address, parse_address};
pub use connection::{Connection, LocalEndpoint, SessionConfig, SessionEvent, SessionRole};
pub use error::NetworkError;
pub use manager::SessionManager;
