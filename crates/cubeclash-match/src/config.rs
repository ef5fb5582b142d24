//! Match configuration and phases.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// MatchConfig
// ---------------------------------------------------------------------------

/// Timings for the match lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Ticks in the start countdown.
    pub countdown_ticks: u32,

    /// Time between two countdown ticks.
    pub countdown_interval: Duration,

    /// How long a joining client may stay in `Connecting`. Hosts are
    /// never timed out.
    pub connection_timeout: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 10,
            countdown_interval: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// MatchPhase
// ---------------------------------------------------------------------------

/// Where the match is in its lifecycle.
///
/// ```text
/// Idle → Connecting → WaitingForOpponent → CountingDown → Playing
///                                               ↑            ↓ restart
///                                               └─ Restarting ┘
/// ```
///
/// - **Idle**: no session. The only phase a session can start from.
/// - **Connecting**: a host is binding or a client is dialing.
/// - **WaitingForOpponent**: our own connection is up, the other player
///   is not (host), or the host has not started the game yet (client).
/// - **CountingDown**: both players are in; the start countdown runs.
/// - **Playing**: avatars accept writes.
/// - **Restarting**: transient, while avatars go back to their spawn points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MatchPhase {
    #[default]
    Idle,
    Connecting,
    WaitingForOpponent,
    CountingDown,
    Playing,
    Restarting,
}

impl MatchPhase {
    /// Returns `true` once our own connection is established.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Self::WaitingForOpponent | Self::CountingDown | Self::Playing | Self::Restarting
        )
    }
}

impl std::fmt::Display for MatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::WaitingForOpponent => write!(f, "WaitingForOpponent"),
            Self::CountingDown => write!(f, "CountingDown"),
            Self::Playing => write!(f, "Playing"),
            Self::Restarting => write!(f, "Restarting"),
        }
    }
}

// ---------------------------------------------------------------------------
// MatchState
// ---------------------------------------------------------------------------

/// Observable state of a match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchState {
    pub phase: MatchPhase,

    /// Time spent in `Connecting` so far.
    pub connection_elapsed: Duration,

    /// Ticks left in the start countdown, while it runs.
    pub countdown_remaining: Option<u32>,
}
