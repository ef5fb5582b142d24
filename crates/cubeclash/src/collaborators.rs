//! Hooks between the session context and the outside world.
//!
//! The context never draws anything or reads devices itself. It reports
//! through a [`Presentation`] and polls a [`MovementInput`], both handed to
//! [`spawn_session`](crate::spawn_session) at construction.

use cubeclash_match::MatchPhase;
use cubeclash_protocol::GameEvent;
use cubeclash_session::NetworkError;

/// Receives everything the player should see or hear.
///
/// Every hook has an empty default, so implementors only override what
/// they render.
pub trait Presentation: Send + 'static {
    /// A human-readable status line.
    fn on_status(&mut self, _message: &str) {}

    fn on_phase_changed(&mut self, _phase: MatchPhase) {}

    /// A gameplay event took effect on this participant.
    fn on_event(&mut self, _event: &GameEvent) {}

    /// Countdown ticks left before the game starts.
    fn on_countdown(&mut self, _remaining: u32) {}

    /// A session failed to start or was lost.
    fn on_network_error(&mut self, _error: &NetworkError) {}
}

/// Source of the local player's movement.
pub trait MovementInput: Send + 'static {
    /// Stick or key direction, each axis in `[-1, 1]`. Values outside are
    /// clamped.
    fn movement_vector(&mut self) -> (f32, f32);
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresentation;

impl Presentation for NullPresentation {}

/// Writes every hook to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPresentation;

impl Presentation for TracingPresentation {
    fn on_status(&mut self, message: &str) {
        tracing::info!(target: "cubeclash::presentation", "{message}");
    }

    fn on_phase_changed(&mut self, phase: MatchPhase) {
        tracing::info!(target: "cubeclash::presentation", %phase, "phase");
    }

    fn on_event(&mut self, event: &GameEvent) {
        tracing::info!(target: "cubeclash::presentation", kind = %event.kind(), ?event, "event");
    }

    fn on_countdown(&mut self, remaining: u32) {
        tracing::info!(target: "cubeclash::presentation", "Game starting in: {remaining}");
    }

    fn on_network_error(&mut self, error: &NetworkError) {
        tracing::warn!(target: "cubeclash::presentation", %error, "network error");
    }
}

/// No movement at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoInput;

impl MovementInput for NoInput {
    fn movement_vector(&mut self) -> (f32, f32) {
        (0.0, 0.0)
    }
}
