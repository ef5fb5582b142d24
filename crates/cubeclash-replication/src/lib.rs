//! Replication channel for Cubeclash.
//!
//! Each replicated field of an entity has exactly one writer. The writer
//! changes it with [`ReplicationChannel::set`]; everybody else holds a
//! shadow copy that only [`ReplicationChannel::apply_update`] may change.
//! Updates carry a per-field sequence number and anything not newer than
//! what was last applied is dropped.
//!
//! The channel also routes discrete [`GameEvent`](cubeclash_protocol::GameEvent)s:
//! push impulses travel client → authority → everyone, every other kind is
//! an authority broadcast.
//!
//! The channel does no I/O. Outgoing messages pile up in an outbox the
//! owner drains with [`ReplicationChannel::drain_outgoing`], and events that
//! take effect locally are collected for [`ReplicationChannel::take_applied_events`].

mod channel;
mod error;
mod variable;

pub use channel::{ApplyOutcome, Outgoing, ReplicationChannel, ReplicationConfig};
pub use error::ReplicationError;
pub use variable::{Replicate, ReplicatedVariable};
