//! Match lifecycle for Cubeclash.
//!
//! A match is driven by a pure state machine: inputs go in (session
//! events, countdown ticks, restart requests) and a list of
//! [`MatchEffect`]s comes out for the session context to carry out. The
//! machine itself never touches the network or the replicated state.
//!
//! # Key types
//!
//! - [`MatchStateMachine`]: phase transitions and the start countdown
//! - [`MatchPhase`]: `Idle → Connecting → WaitingForOpponent → CountingDown → Playing`
//! - [`EntitySpawner`]: creates the two avatars and records who owns them
//! - [`MatchConfig`] / [`SpawnConfig`]: timings, templates, spawn points

mod config;
mod error;
mod machine;
mod spawner;

pub use config::{MatchConfig, MatchPhase, MatchState};
pub use error::MatchError;
pub use machine::{MatchEffect, MatchStateMachine};
pub use spawner::{Entity, EntitySpawner, EntityTemplate, SpawnConfig};
