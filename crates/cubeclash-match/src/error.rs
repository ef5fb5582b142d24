//! Error types for the match layer.

use cubeclash_protocol::{AvatarRole, EntityId};
use cubeclash_replication::ReplicationError;

use crate::MatchPhase;

/// Errors that can occur during match operations.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    /// Only the host may do this.
    #[error("only the host can do this")]
    NotAuthority,

    /// The match is in a phase that doesn't allow this operation.
    #[error("cannot {operation} while {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: MatchPhase,
    },

    /// No template configured for this avatar. Not retried.
    #[error("no entity template configured for the {0}")]
    MissingEntityTemplate(AvatarRole),

    /// The avatar for this role already exists.
    #[error("the {0} is already spawned")]
    AlreadySpawned(AvatarRole),

    /// The avatar this operation needs is not spawned.
    #[error("the {0} is not spawned")]
    MissingAvatar(AvatarRole),

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// Neither the authority nor the owner of the entity.
    #[error("not allowed to reset entity {0}")]
    NotOwner(EntityId),

    #[error(transparent)]
    Replication(#[from] ReplicationError),
}
