//! Unified error type for Cubeclash.

use cubeclash_match::MatchError;
use cubeclash_protocol::ProtocolError;
use cubeclash_replication::ReplicationError;
use cubeclash_session::NetworkError;
use cubeclash_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors.
#[derive(Debug, thiserror::Error)]
pub enum CubeclashError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Address validation, bind, connect, timeout, refusal.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Match phase or spawning errors.
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// The session context task is gone.
    #[error("session context is closed")]
    Closed,
}
