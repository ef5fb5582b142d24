//! Wire protocol for Cubeclash.
//!
//! This crate defines what the host and the client say to each other:
//!
//! - **Types** ([`WireMessage`], [`GameEvent`], [`EntitySnapshot`], ...):
//!   the structures that travel on the wire, plus the small math types
//!   ([`Vec3`], [`Rotation`]) that replicated fields carry.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (WireMessage) → Session (connections)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{
    AvatarRole, ConnectionId, EntityId, EntitySnapshot, EventKind, FieldValue, GameEvent,
    Recipient, ReplicatedField, Rotation, Transform, Vec3, WireMessage,
};

/// Version a client announces in its `ConnectRequest`.
pub const PROTOCOL_VERSION: u32 = 1;
