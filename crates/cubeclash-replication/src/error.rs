//! Error types for the replication layer.

use cubeclash_protocol::{ConnectionId, EntityId, ReplicatedField};

/// Why a write, update, or event was turned down.
///
/// Rejections are logged and reported, never applied. A stale update is not
/// an error; see [`ApplyOutcome::Stale`](crate::ApplyOutcome::Stale).
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// The field was never declared, or its entity has been forgotten.
    #[error("{entity} has no replicated {field}")]
    Undeclared {
        entity: EntityId,
        field: ReplicatedField,
    },

    /// A local write to a field owned by another connection.
    #[error("{entity} {field} is owned by {owner}, not by us")]
    NotOwner {
        entity: EntityId,
        field: ReplicatedField,
        owner: ConnectionId,
    },

    /// An incoming update from a connection that may not write the field.
    #[error("{from} may not write {entity} {field}")]
    UnauthorizedWriter {
        from: ConnectionId,
        entity: EntityId,
        field: ReplicatedField,
    },

    /// An authority-only operation on a non-authority participant, or an
    /// authority-only event from somebody else.
    #[error("{kind} may only come from the authority")]
    NotAuthority { kind: &'static str },

    /// Owner writes are off (the match is not being played).
    #[error("replicated writes are disabled")]
    WritesDisabled,

    /// The value doesn't match the field's type.
    #[error("{entity} {field} got a value of the wrong type")]
    TypeMismatch {
        entity: EntityId,
        field: ReplicatedField,
    },
}
