//! # Cubeclash
//!
//! Networked session layer for a two-player cube arena game.
//!
//! One player hosts and is the authority, the other joins by IPv4 address.
//! Each player drives their own cube; the host runs the start countdown,
//! resolves pushes and falls, and can restart the match at any time.
//!
//! A process runs one session context, spawned with [`spawn_session`]. The
//! context owns the session, the match state machine, the avatars, and the
//! replicated state. Rendering and input stay outside, behind the
//! [`Presentation`] and [`MovementInput`] traits.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cubeclash::prelude::*;
//!
//! # async fn run() -> Result<(), CubeclashError> {
//! let binding = WebSocketBinding::new(WebSocketConfig::default());
//! let handle = spawn_session(
//!     ContextConfig::default(),
//!     binding,
//!     TracingPresentation,
//!     NoInput,
//! );
//! let endpoint = handle.host().await?;
//! println!("hosting on {endpoint}");
//! # Ok(())
//! # }
//! ```

mod collaborators;
mod config;
mod context;
mod error;
pub mod motion;

pub use collaborators::{MovementInput, NoInput, NullPresentation, Presentation, TracingPresentation};
pub use config::ContextConfig;
pub use context::{ContextSnapshot, SessionHandle, spawn_session};
pub use error::CubeclashError;
pub use motion::MotionConfig;

/// Everything needed to run a session, in one import.
pub mod prelude {
    pub use crate::{
        ContextConfig, ContextSnapshot, CubeclashError, MotionConfig, MovementInput, NoInput,
        NullPresentation, Presentation, SessionHandle, TracingPresentation, spawn_session,
    };
    pub use cubeclash_match::{MatchConfig, MatchError, MatchPhase, MatchState, SpawnConfig};
    pub use cubeclash_protocol::{AvatarRole, ConnectionId, EntityId, EntitySnapshot, GameEvent, Vec3};
    pub use cubeclash_replication::ReplicationConfig;
    pub use cubeclash_session::{LocalEndpoint, NetworkError, SessionConfig, SessionRole};
    pub use cubeclash_transport::{MemoryBinding, MemoryNetwork, WebSocketBinding, WebSocketConfig};
}
