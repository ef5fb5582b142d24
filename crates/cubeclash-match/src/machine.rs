//! The match state machine.
//!
//! Every input returns the effects it caused, in the order they must be
//! carried out. Nothing here blocks or does I/O: the countdown is a
//! [`Countdown`] whose ticks the caller schedules, and the connection
//! timeout advances with the elapsed time the caller feeds in.

use std::time::Duration;

use cubeclash_protocol::{ConnectionId, GameEvent};
use cubeclash_session::SessionRole;
use cubeclash_tick::{Countdown, CountdownHandle, CountdownStep};

use crate::{MatchConfig, MatchError, MatchPhase, MatchState};

/// Something the owner of the machine must do.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchEffect {
    /// The phase changed. Emitted once per transition.
    PhaseChanged(MatchPhase),

    /// Human-readable status line.
    Status(String),

    /// Spawn the host avatar (authority only).
    SpawnHostAvatar,

    /// Spawn the avatar owned by this connection (authority only).
    SpawnClientAvatar(ConnectionId),

    /// Remove every avatar owned by this connection.
    DespawnOwnedBy(ConnectionId),

    /// Call [`MatchStateMachine::countdown_elapsed`] with this handle after
    /// one countdown interval. Replaces any previously scheduled tick.
    ScheduleCountdownTick(CountdownHandle),

    /// Drop the scheduled countdown tick.
    CancelCountdown,

    /// Countdown ticks left, for display and for mirroring to the client.
    Countdown(u32),

    /// Send a gameplay event, to everyone or to one connection.
    SendEvent {
        event: GameEvent,
        to: Option<ConnectionId>,
    },

    /// Toggle owner writes on replicated fields.
    SetWritesEnabled(bool),

    /// Put every avatar back on its spawn point with zero velocity.
    ResetEntities,

    /// Forget every avatar.
    ReleaseEntities,

    /// The client gave up connecting. The session should be shut down.
    ConnectionTimedOut,
}

/// Phases of one match, for one participant.
#[derive(Debug)]
pub struct MatchStateMachine {
    config: MatchConfig,
    role: Option<SessionRole>,
    state: MatchState,
    countdown: Countdown,
    reported_secs: Option<u64>,
}

impl MatchStateMachine {
    pub fn new(config: MatchConfig) -> Self {
        Self {
            config,
            role: None,
            state: MatchState::default(),
            countdown: Countdown::new(),
            reported_secs: None,
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn phase(&self) -> MatchPhase {
        self.state.phase
    }

    /// Role of the session in progress, if any.
    pub fn role(&self) -> Option<SessionRole> {
        self.role
    }

    pub fn is_host(&self) -> bool {
        self.role == Some(SessionRole::Host)
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// A host or client session was requested.
    ///
    /// # Errors
    /// [`MatchError::InvalidPhase`] unless the match is `Idle`.
    pub fn begin(&mut self, role: SessionRole) -> Result<Vec<MatchEffect>, MatchError> {
        if self.state.phase != MatchPhase::Idle {
            return Err(MatchError::InvalidPhase {
                operation: "start a session",
                phase: self.state.phase,
            });
        }

        let mut effects = Vec::new();
        self.role = Some(role);
        self.state.connection_elapsed = Duration::ZERO;
        self.set_phase(MatchPhase::Connecting, &mut effects);

        match role {
            SessionRole::Host => {
                effects.push(MatchEffect::Status("Starting host...".to_owned()));
            }
            SessionRole::Client => {
                let secs = self.config.connection_timeout.as_secs_f64().ceil() as u64;
                self.reported_secs = Some(secs);
                effects.push(MatchEffect::Status(format!("Connecting... {secs}s")));
            }
        }
        Ok(effects)
    }

    /// Starting the session failed before any connection came up.
    pub fn start_failed(&mut self, reason: &str) -> Vec<MatchEffect> {
        if self.state.phase == MatchPhase::Idle {
            return Vec::new();
        }
        tracing::warn!(reason, "session failed to start");
        self.teardown(Some(reason.to_owned()))
    }

    /// A connection finished its handshake.
    pub fn connection_established(
        &mut self,
        connection: ConnectionId,
        is_local: bool,
    ) -> Vec<MatchEffect> {
        let mut effects = Vec::new();

        if is_local {
            if self.state.phase != MatchPhase::Connecting {
                tracing::debug!(%connection, phase = %self.state.phase, "local connection outside of Connecting ignored");
                return effects;
            }
            self.state.connection_elapsed = Duration::ZERO;
            self.reported_secs = None;
            self.set_phase(MatchPhase::WaitingForOpponent, &mut effects);

            if self.is_host() {
                effects.push(MatchEffect::SpawnHostAvatar);
                effects.push(MatchEffect::Status("Waiting for players...".to_owned()));
            } else {
                effects.push(MatchEffect::Status("Connected successfully!".to_owned()));
            }
            return effects;
        }

        // The client learns about the host through its own connection.
        if !self.is_host() {
            return effects;
        }

        match self.state.phase {
            MatchPhase::WaitingForOpponent | MatchPhase::CountingDown => {
                effects.push(MatchEffect::SpawnClientAvatar(connection));
                effects.push(MatchEffect::Status(format!("Player {connection} connected")));
                self.start_countdown(&mut effects);
            }
            MatchPhase::Playing | MatchPhase::Restarting => {
                effects.push(MatchEffect::SpawnClientAvatar(connection));
                effects.push(MatchEffect::SendEvent {
                    event: GameEvent::GameStarted,
                    to: Some(connection),
                });
                effects.push(MatchEffect::Status(format!("Player {connection} rejoined")));
            }
            phase => {
                tracing::debug!(%connection, %phase, "remote connection ignored");
            }
        }
        effects
    }

    /// A connection went away.
    pub fn connection_lost(&mut self, connection: ConnectionId, is_local: bool) -> Vec<MatchEffect> {
        if is_local {
            if self.state.phase == MatchPhase::Idle {
                return Vec::new();
            }
            return self.teardown(Some("Disconnected from server".to_owned()));
        }

        let mut effects = Vec::new();
        if !self.is_host() {
            return effects;
        }

        effects.push(MatchEffect::DespawnOwnedBy(connection));
        effects.push(MatchEffect::Status(format!("Player {connection} disconnected")));

        if self.state.phase == MatchPhase::CountingDown {
            self.cancel_countdown(&mut effects);
            self.set_phase(MatchPhase::WaitingForOpponent, &mut effects);
        }
        effects
    }

    /// Feeds elapsed time. Only a connecting client is affected: it reports
    /// progress and gives up once the connection timeout has passed.
    pub fn advance(&mut self, dt: Duration) -> Vec<MatchEffect> {
        let mut effects = Vec::new();
        if self.state.phase != MatchPhase::Connecting || self.role != Some(SessionRole::Client) {
            return effects;
        }

        self.state.connection_elapsed += dt;
        let timeout = self.config.connection_timeout;
        if self.state.connection_elapsed >= timeout {
            tracing::warn!(?timeout, "connection attempt timed out");
            effects.push(MatchEffect::ConnectionTimedOut);
            effects.extend(self.teardown(Some(
                "Connection timeout! Please try again.".to_owned(),
            )));
            return effects;
        }

        let left = timeout - self.state.connection_elapsed;
        let secs = left.as_secs_f64().ceil() as u64;
        if self.reported_secs != Some(secs) {
            self.reported_secs = Some(secs);
            effects.push(MatchEffect::Status(format!("Connecting... {secs}s")));
        }
        effects
    }

    /// Drops the match whatever phase it is in.
    pub fn reset(&mut self) -> Vec<MatchEffect> {
        if self.state.phase == MatchPhase::Idle && self.role.is_none() {
            return Vec::new();
        }
        self.teardown(None)
    }

    // -----------------------------------------------------------------------
    // Countdown
    // -----------------------------------------------------------------------

    /// One countdown interval passed for `handle`.
    ///
    /// Ticks of a countdown that was restarted or cancelled since are
    /// ignored. The last tick starts the game.
    pub fn countdown_elapsed(&mut self, handle: CountdownHandle) -> Vec<MatchEffect> {
        let mut effects = Vec::new();
        match self.countdown.tick(handle) {
            CountdownStep::Stale => {
                tracing::trace!("stale countdown tick ignored");
            }
            CountdownStep::Tick { remaining } => {
                self.state.countdown_remaining = Some(remaining);
                effects.push(MatchEffect::Countdown(remaining));
                effects.push(MatchEffect::ScheduleCountdownTick(handle));
            }
            CountdownStep::Finished => {
                self.state.countdown_remaining = None;
                effects.push(MatchEffect::Countdown(0));
                self.set_phase(MatchPhase::Playing, &mut effects);
                effects.push(MatchEffect::SendEvent {
                    event: GameEvent::GameStarted,
                    to: None,
                });
                effects.push(MatchEffect::SetWritesEnabled(true));
                effects.push(MatchEffect::Status("Game started!".to_owned()));
            }
        }
        effects
    }

    /// The host reported its countdown (client side).
    pub fn countdown_synced(&mut self, remaining: u32) -> Vec<MatchEffect> {
        let mut effects = Vec::new();
        if self.role != Some(SessionRole::Client)
            || !matches!(
                self.state.phase,
                MatchPhase::WaitingForOpponent | MatchPhase::CountingDown
            )
        {
            return effects;
        }

        self.set_phase(MatchPhase::CountingDown, &mut effects);
        self.state.countdown_remaining = Some(remaining);
        effects.push(MatchEffect::Countdown(remaining));
        effects
    }

    // -----------------------------------------------------------------------
    // Game events
    // -----------------------------------------------------------------------

    /// `GameStarted` arrived from the host (client side).
    pub fn game_started(&mut self) -> Vec<MatchEffect> {
        let mut effects = Vec::new();
        if self.role != Some(SessionRole::Client) || !self.state.phase.is_connected() {
            return effects;
        }
        if self.state.phase == MatchPhase::Playing {
            return effects;
        }

        self.state.countdown_remaining = None;
        self.set_phase(MatchPhase::Playing, &mut effects);
        effects.push(MatchEffect::SetWritesEnabled(true));
        effects.push(MatchEffect::Status("Game started!".to_owned()));
        effects
    }

    /// `GameRestarted` arrived from the host (client side).
    pub fn game_restarted(&mut self) -> Vec<MatchEffect> {
        let mut effects = Vec::new();
        if self.role != Some(SessionRole::Client) || !self.state.phase.is_connected() {
            return effects;
        }

        self.state.countdown_remaining = None;
        self.set_phase(MatchPhase::Restarting, &mut effects);
        effects.push(MatchEffect::SetWritesEnabled(true));
        effects.push(MatchEffect::ResetEntities);
        self.set_phase(MatchPhase::Playing, &mut effects);
        effects.push(MatchEffect::Status("Game restarted!".to_owned()));
        effects
    }

    /// Restarts the match from the spawn points (host only).
    ///
    /// A running countdown is abandoned; the match goes straight to
    /// `Playing`.
    ///
    /// # Errors
    /// - [`MatchError::NotAuthority`] on a client
    /// - [`MatchError::InvalidPhase`] before the host is up
    pub fn restart(&mut self) -> Result<Vec<MatchEffect>, MatchError> {
        if !self.is_host() {
            return Err(MatchError::NotAuthority);
        }
        if !self.state.phase.is_connected() {
            return Err(MatchError::InvalidPhase {
                operation: "restart the game",
                phase: self.state.phase,
            });
        }

        let mut effects = Vec::new();
        if self.countdown.is_running() {
            self.cancel_countdown(&mut effects);
        }
        self.set_phase(MatchPhase::Restarting, &mut effects);
        effects.push(MatchEffect::ResetEntities);
        effects.push(MatchEffect::SendEvent {
            event: GameEvent::GameRestarted,
            to: None,
        });
        self.set_phase(MatchPhase::Playing, &mut effects);
        effects.push(MatchEffect::SetWritesEnabled(true));
        effects.push(MatchEffect::Status("Game restarted!".to_owned()));
        Ok(effects)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn set_phase(&mut self, phase: MatchPhase, effects: &mut Vec<MatchEffect>) {
        if self.state.phase == phase {
            return;
        }
        tracing::info!(from = %self.state.phase, to = %phase, "match phase changed");
        self.state.phase = phase;
        effects.push(MatchEffect::PhaseChanged(phase));
    }

    /// Starts a fresh countdown. A running one is replaced; its pending
    /// tick goes stale.
    fn start_countdown(&mut self, effects: &mut Vec<MatchEffect>) {
        let ticks = self.config.countdown_ticks;
        let handle = self.countdown.start(ticks);
        self.state.countdown_remaining = Some(ticks);
        self.set_phase(MatchPhase::CountingDown, effects);
        effects.push(MatchEffect::Countdown(ticks));
        effects.push(MatchEffect::ScheduleCountdownTick(handle));
    }

    fn cancel_countdown(&mut self, effects: &mut Vec<MatchEffect>) {
        self.countdown.cancel();
        self.state.countdown_remaining = None;
        effects.push(MatchEffect::CancelCountdown);
    }

    fn teardown(&mut self, status: Option<String>) -> Vec<MatchEffect> {
        let mut effects = Vec::new();
        self.cancel_countdown(&mut effects);
        effects.push(MatchEffect::SetWritesEnabled(false));
        effects.push(MatchEffect::ReleaseEntities);
        self.role = None;
        self.reported_secs = None;
        self.state.connection_elapsed = Duration::ZERO;
        self.set_phase(MatchPhase::Idle, &mut effects);
        if let Some(status) = status {
            effects.push(MatchEffect::Status(status));
        }
        effects
    }
}
