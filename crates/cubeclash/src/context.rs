//! The session context: one task that owns the session, the match, the
//! avatars, and the replicated state.
//!
//! Everything that mutates game state happens inside [`SessionContext::run`].
//! The outside world talks to it through a cloneable [`SessionHandle`];
//! transport I/O tasks only feed the session's event queue.
//!
//! One pass of the loop handles exactly one of:
//!
//! - a command from a [`SessionHandle`]
//! - a [`SessionEvent`] from the session manager
//! - a countdown tick
//! - a processing tick (connection timeout, avatar motion, fall detection)
//!
//! and then settles the gameplay events that took effect and flushes the
//! replication outbox to the network.

use std::collections::HashMap;
use std::time::Duration;

use cubeclash_match::{
    Entity, EntitySpawner, MatchEffect, MatchError, MatchPhase, MatchState, MatchStateMachine,
};
use cubeclash_protocol::{
    AvatarRole, ConnectionId, EntityId, EntitySnapshot, GameEvent, Recipient, Vec3, WireMessage,
};
use cubeclash_replication::{Outgoing, ReplicationChannel, ReplicationError};
use cubeclash_session::{
    LocalEndpoint, NetworkError, SessionEvent, SessionManager, SessionRole, parse_address,
};
use cubeclash_tick::{CountdownHandle, ScheduledTimer, SimulationClock, TickInfo};
use cubeclash_transport::TransportBinding;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::{ContextConfig, CubeclashError, MovementInput, Presentation, motion};

const COMMAND_BUFFER: usize = 32;

// ---------------------------------------------------------------------------
// Commands and handle
// ---------------------------------------------------------------------------

enum Command {
    Host {
        reply: oneshot::Sender<Result<LocalEndpoint, CubeclashError>>,
    },
    Join {
        address: String,
        reply: oneshot::Sender<Result<(), CubeclashError>>,
    },
    Restart {
        reply: oneshot::Sender<Result<(), CubeclashError>>,
    },
    Push {
        reply: oneshot::Sender<Result<(), CubeclashError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<ContextSnapshot>,
    },
    Quit {
        reply: oneshot::Sender<()>,
    },
}

/// What a session context looks like from the outside at one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextSnapshot {
    pub state: MatchState,
    pub role: Option<SessionRole>,
    /// Our own connection, once established.
    pub local: Option<ConnectionId>,
    pub writes_enabled: bool,
    pub entities: Vec<EntitySnapshot>,
}

impl ContextSnapshot {
    pub fn phase(&self) -> MatchPhase {
        self.state.phase
    }

    pub fn avatar(&self, role: AvatarRole) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| e.role == role)
    }
}

/// Handle to a running session context.
///
/// Cheap to clone. Every method waits for the context to process the
/// request and fails with [`CubeclashError::Closed`] once it has stopped.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<Command>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CubeclashError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.sender
            .send(command(reply_tx))
            .await
            .map_err(|_| CubeclashError::Closed)?;
        reply_rx.await.map_err(|_| CubeclashError::Closed)
    }

    /// Starts hosting on the configured port.
    pub async fn host(&self) -> Result<LocalEndpoint, CubeclashError> {
        self.request(|reply| Command::Host { reply }).await?
    }

    /// Joins the host at `address`, a dotted-quad IPv4.
    ///
    /// Returns once the attempt is underway. An invalid address is
    /// rejected before any network activity.
    pub async fn join(&self, address: impl Into<String>) -> Result<(), CubeclashError> {
        let address = address.into();
        self.request(|reply| Command::Join { address, reply }).await?
    }

    /// Restarts the match from the spawn points (host only).
    pub async fn restart(&self) -> Result<(), CubeclashError> {
        self.request(|reply| Command::Restart { reply }).await?
    }

    /// Pushes the opponent's avatar away from ours.
    pub async fn push(&self) -> Result<(), CubeclashError> {
        self.request(|reply| Command::Push { reply }).await?
    }

    /// Ends the session and returns to `Idle`. Idempotent.
    pub async fn shutdown(&self) -> Result<(), CubeclashError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    pub async fn snapshot(&self) -> Result<ContextSnapshot, CubeclashError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Shuts down and stops the context task.
    pub async fn quit(&self) -> Result<(), CubeclashError> {
        self.request(|reply| Command::Quit { reply }).await
    }

    /// Returns `true` once the context task has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Spawns a session context on the current Tokio runtime.
pub fn spawn_session<B, P, I>(
    config: ContextConfig,
    binding: B,
    presentation: P,
    input: I,
) -> SessionHandle
where
    B: TransportBinding,
    P: Presentation,
    I: MovementInput,
{
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    let context = SessionContext::new(config, binding, presentation, input);
    tokio::spawn(context.run(receiver));
    SessionHandle { sender }
}

// ---------------------------------------------------------------------------
// SessionContext
// ---------------------------------------------------------------------------

/// The single owner of all session and game state of one process.
struct SessionContext<B, P, I> {
    config: ContextConfig,
    session: SessionManager<B>,
    machine: MatchStateMachine,
    spawner: EntitySpawner,
    channel: ReplicationChannel,
    presentation: P,
    input: I,
    countdown_timer: ScheduledTimer<CountdownHandle>,
    clock: SimulationClock,
    /// Last fall of each avatar, for duplicate suppression.
    falls: HashMap<EntityId, Instant>,
    /// Last contact push against each avatar.
    pushes: HashMap<EntityId, Instant>,
}

impl<B, P, I> SessionContext<B, P, I>
where
    B: TransportBinding,
    P: Presentation,
    I: MovementInput,
{
    fn new(config: ContextConfig, binding: B, presentation: P, input: I) -> Self {
        let mut clock = SimulationClock::new(config.tick_rate_hz.max(1));
        clock.pause();
        Self {
            session: SessionManager::new(binding, config.session.clone()),
            machine: MatchStateMachine::new(config.lifecycle.clone()),
            spawner: EntitySpawner::new(config.spawn.clone()),
            channel: ReplicationChannel::unbound(config.replication.clone()),
            presentation,
            input,
            countdown_timer: ScheduledTimer::new(),
            clock,
            falls: HashMap::new(),
            pushes: HashMap::new(),
            config,
        }
    }

    /// Runs until [`SessionHandle::quit`] or until every handle is dropped.
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!("session context started");

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        self.shutdown().await;
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
                event = self.session.next_event() => self.handle_session_event(event).await,
                handle = self.countdown_timer.fired() => {
                    let effects = self.machine.countdown_elapsed(handle);
                    self.apply(effects).await;
                }
                tick = self.clock.wait_for_tick() => self.on_tick(tick).await,
            }

            self.settle_events().await;
            self.flush();
            self.sync_clock();
        }

        tracing::info!("session context stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Returns `false` when the context should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::Host { reply } => {
                let result = self.host().await;
                let _ = reply.send(result);
            }
            Command::Join { address, reply } => {
                let result = self.join(&address).await;
                let _ = reply.send(result);
            }
            Command::Restart { reply } => {
                let result = self.restart().await;
                let _ = reply.send(result);
            }
            Command::Push { reply } => {
                let _ = reply.send(self.push());
            }
            Command::Shutdown { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Quit { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    async fn host(&mut self) -> Result<LocalEndpoint, CubeclashError> {
        let effects = self.machine.begin(SessionRole::Host)?;
        self.apply(effects).await;
        self.channel.rebind(ConnectionId::SERVER);

        match self.session.start_host().await {
            Ok(endpoint) => {
                self.status(&format!("Hosting on: {endpoint}"));
                Ok(endpoint)
            }
            Err(error) => {
                tracing::error!(%error, "failed to start host");
                self.presentation.on_network_error(&error);
                let effects = self.machine.start_failed("Failed to start host");
                self.apply(effects).await;
                Err(error.into())
            }
        }
    }

    async fn join(&mut self, address: &str) -> Result<(), CubeclashError> {
        if let Err(error) = parse_address(address) {
            self.status("Invalid IP address format!");
            self.presentation.on_network_error(&error);
            return Err(error.into());
        }

        let effects = self.machine.begin(SessionRole::Client)?;
        self.apply(effects).await;
        self.status(&format!("Connecting to {address}..."));

        if let Err(error) = self.session.start_client(address).await {
            tracing::error!(%error, "failed to start client");
            self.presentation.on_network_error(&error);
            let effects = self.machine.start_failed("Failed to start client");
            self.apply(effects).await;
            return Err(error.into());
        }
        Ok(())
    }

    async fn restart(&mut self) -> Result<(), CubeclashError> {
        let effects = self.machine.restart()?;
        self.apply(effects).await;
        Ok(())
    }

    fn push(&mut self) -> Result<(), CubeclashError> {
        let phase = self.machine.phase();
        if phase != MatchPhase::Playing {
            return Err(MatchError::InvalidPhase {
                operation: "push",
                phase,
            }
            .into());
        }

        let (source, target) = self.local_and_opponent()?;
        let event = self.push_event(source, target);
        self.channel.send_event(event)?;
        Ok(())
    }

    /// Our avatar and the other player's.
    fn local_and_opponent(&self) -> Result<(&Entity, &Entity), MatchError> {
        let (ours, theirs) = if self.channel.is_authority() {
            (AvatarRole::HostAvatar, AvatarRole::ClientAvatar)
        } else {
            (AvatarRole::ClientAvatar, AvatarRole::HostAvatar)
        };
        let source = self
            .spawner
            .by_role(ours)
            .ok_or(MatchError::MissingAvatar(ours))?;
        let target = self
            .spawner
            .by_role(theirs)
            .ok_or(MatchError::MissingAvatar(theirs))?;
        Ok((source, target))
    }

    /// A push of `target` straight away from `source`.
    fn push_event(&self, source: &Entity, target: &Entity) -> GameEvent {
        let from = self.channel.get(source.position).unwrap_or(Vec3::ZERO);
        let to = self.channel.get(target.position).unwrap_or(Vec3::ZERO);
        let impulse = (to - from)
            .normalized()
            .map(|direction| direction * self.channel.config().push_force)
            .unwrap_or(Vec3::ZERO);

        GameEvent::PushImpulse {
            source: source.id,
            target: target.id,
            impulse,
        }
    }

    async fn shutdown(&mut self) {
        self.session.shutdown().await;
        let effects = self.machine.reset();
        self.apply(effects).await;
        self.countdown_timer.disarm();
    }

    fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            state: self.machine.state().clone(),
            role: self.machine.role(),
            local: self.session.local_connection(),
            writes_enabled: self.channel.writes_enabled(),
            entities: self
                .spawner
                .iter()
                .map(|entity| entity.snapshot(&self.channel))
                .collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Session events
    // -----------------------------------------------------------------------

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::ServerStarted(endpoint) => {
                tracing::info!(%endpoint, "server started");
                self.status("Server started successfully!");
            }
            SessionEvent::ServerStopped => self.status("Server stopped"),
            SessionEvent::ConnectionEstablished {
                connection,
                is_local,
            } => {
                if is_local && !connection.is_server() {
                    self.channel.rebind(connection);
                }
                let effects = self.machine.connection_established(connection, is_local);
                self.apply(effects).await;
            }
            SessionEvent::ConnectionLost {
                connection,
                is_local,
            } => {
                let effects = self.machine.connection_lost(connection, is_local);
                self.apply(effects).await;
                if is_local {
                    self.session.shutdown().await;
                }
            }
            SessionEvent::ConnectionRefused { reason } => {
                self.presentation
                    .on_network_error(&NetworkError::Refused(reason.clone()));
                let effects = self.machine.start_failed(&reason);
                self.apply(effects).await;
                self.session.shutdown().await;
            }
            SessionEvent::Message { from, message } => self.handle_message(from, message).await,
        }
    }

    async fn handle_message(&mut self, from: ConnectionId, message: WireMessage) {
        match message {
            WireMessage::ReplicatedUpdate {
                entity_id,
                field,
                seq,
                value,
            } => {
                if let Err(error) = self
                    .channel
                    .apply_update(from, entity_id, field, seq, value)
                {
                    tracing::debug!(%from, %error, "replicated update rejected");
                }
            }
            WireMessage::Event { event } => {
                if let Err(error) = self.channel.receive_event(from, event) {
                    tracing::debug!(%from, %error, "event rejected");
                }
            }
            WireMessage::EntitySpawned { entity } if from.is_server() => {
                if let Err(error) = self.spawner.adopt(entity, &mut self.channel) {
                    self.status(&error.to_string());
                }
            }
            WireMessage::EntityDespawned { entity_id } if from.is_server() => {
                self.spawner.despawn(entity_id, &mut self.channel);
            }
            WireMessage::Countdown { remaining } if from.is_server() => {
                let effects = self.machine.countdown_synced(remaining);
                self.apply(effects).await;
            }
            WireMessage::Disconnect { reason } => {
                tracing::debug!(%from, %reason, "peer said goodbye");
            }
            other => {
                tracing::debug!(%from, message = ?other, "ignoring message");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Gameplay events
    // -----------------------------------------------------------------------

    /// Reacts to every event that took effect locally, including those the
    /// reactions themselves cause.
    async fn settle_events(&mut self) {
        loop {
            let events = self.channel.take_applied_events();
            if events.is_empty() {
                return;
            }
            for event in events {
                let effects = self.on_game_event(event);
                self.apply(effects).await;
            }
        }
    }

    fn on_game_event(&mut self, event: GameEvent) -> Vec<MatchEffect> {
        self.presentation.on_event(&event);

        match event {
            GameEvent::GameStarted => self.machine.game_started(),
            GameEvent::GameRestarted => self.machine.game_restarted(),
            GameEvent::PlayerFell { entity, .. } => {
                self.on_player_fell(entity);
                Vec::new()
            }
            GameEvent::PushImpulse {
                target, impulse, ..
            } => {
                self.on_pushed(target, impulse);
                Vec::new()
            }
        }
    }

    fn on_player_fell(&mut self, entity: EntityId) {
        let Some((template, owner)) = self
            .spawner
            .get(entity)
            .map(|avatar| (avatar.template.clone(), avatar.owner))
        else {
            return;
        };
        self.status(&format!("{template} fell off!"));

        // The authority already put it back.
        if !self.channel.is_authority() && self.channel.local() == Some(owner) {
            if let Err(error) = self.spawner.reset_entity(entity, &mut self.channel) {
                tracing::warn!(%entity, %error, "could not reset fallen avatar");
            }
        }
    }

    fn on_pushed(&mut self, target: EntityId, impulse: Vec3) {
        let Some(avatar) = self.spawner.get(target) else {
            return;
        };
        if self.channel.local() != Some(avatar.owner) {
            return;
        }

        let velocity = self.channel.get(avatar.velocity).unwrap_or(Vec3::ZERO);
        let pushed = velocity + self.config.motion.impulse_to_velocity(impulse);
        if let Err(error) = self.channel.set(avatar.velocity, pushed) {
            tracing::debug!(%target, %error, "push not applied");
        }
    }

    // -----------------------------------------------------------------------
    // Ticks
    // -----------------------------------------------------------------------

    /// Processing ticks only run while a session is underway.
    fn sync_clock(&mut self) {
        if self.machine.phase() == MatchPhase::Idle {
            self.clock.pause();
        } else {
            self.clock.resume();
        }
    }

    async fn on_tick(&mut self, tick: TickInfo) {
        let effects = self.machine.advance(tick.elapsed);
        self.apply(effects).await;

        if self.machine.phase() == MatchPhase::Playing {
            self.move_local_avatar(tick.dt);
            self.detect_contact();
            if self.channel.is_authority() {
                self.detect_falls();
            }
        }
        self.clock.record_tick_end();
    }

    fn move_local_avatar(&mut self, dt: Duration) {
        let Some(local) = self.channel.local() else {
            return;
        };
        let Some(avatar) = self.spawner.owned_by(local).next() else {
            return;
        };
        let (Some(position), Some(velocity)) = (
            self.channel.get(avatar.position),
            self.channel.get(avatar.velocity),
        ) else {
            return;
        };

        let input = self.input.movement_vector();
        let (next_position, next_velocity) =
            motion::step(&self.config.motion, input, position, velocity, dt);

        if let Err(error) = write_motion(
            &mut self.channel,
            avatar,
            (position, velocity),
            (next_position, next_velocity),
        ) {
            tracing::debug!(entity = %avatar.id, %error, "motion not written");
        }
    }

    /// Pushes the other avatar when ours runs into it.
    fn detect_contact(&mut self) {
        let Ok((ours, theirs)) = self.local_and_opponent() else {
            return;
        };
        let (Some(position), Some(velocity), Some(other)) = (
            self.channel.get(ours.position),
            self.channel.get(ours.velocity),
            self.channel.get(theirs.position),
        ) else {
            return;
        };
        let motion = &self.config.motion;
        if !motion::is_moving(velocity) || !motion.in_contact(position, other) {
            return;
        }

        let now = Instant::now();
        let (source, target) = (ours.id, theirs.id);
        if self
            .pushes
            .get(&target)
            .is_some_and(|at| now.duration_since(*at) < motion.push_cooldown)
        {
            return;
        }

        let event = self.push_event(ours, theirs);
        self.pushes.insert(target, now);
        tracing::debug!(%source, %target, "avatars touched");
        if let Err(error) = self.channel.send_event(event) {
            tracing::debug!(%target, %error, "contact push not sent");
        }
    }

    fn detect_falls(&mut self) {
        let now = Instant::now();
        let motion = &self.config.motion;
        let fallen: Vec<(EntityId, AvatarRole)> = self
            .spawner
            .iter()
            .filter(|avatar| {
                self.channel
                    .get(avatar.position)
                    .is_some_and(|position| motion.has_fallen(position))
            })
            .filter(|avatar| {
                self.falls
                    .get(&avatar.id)
                    .is_none_or(|at| now.duration_since(*at) >= motion.fall_cooldown)
            })
            .map(|avatar| (avatar.id, avatar.role))
            .collect();

        for (entity, role) in fallen {
            tracing::info!(%entity, %role, "avatar fell off the platform");
            self.falls.insert(entity, now);
            if let Err(error) = self.spawner.reset_entity(entity, &mut self.channel) {
                tracing::warn!(%entity, %error, "could not reset fallen avatar");
            }
            if let Err(error) = self.channel.send_event(GameEvent::PlayerFell { entity, role }) {
                tracing::warn!(%entity, %error, "could not announce fall");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    async fn apply(&mut self, effects: Vec<MatchEffect>) {
        for effect in effects {
            match effect {
                MatchEffect::PhaseChanged(phase) => self.presentation.on_phase_changed(phase),
                MatchEffect::Status(message) => self.status(&message),
                MatchEffect::SpawnHostAvatar => {
                    let spawned = self
                        .spawner
                        .spawn_for_host(&mut self.channel)
                        .map(|avatar| avatar.id);
                    if let Err(error) = spawned {
                        self.status(&error.to_string());
                    }
                }
                MatchEffect::SpawnClientAvatar(connection) => {
                    let spawned = self
                        .spawner
                        .spawn_for_client(connection, &mut self.channel)
                        .map(|avatar| avatar.id);
                    if let Err(error) = spawned {
                        self.status(&error.to_string());
                    }
                    self.announce_entities(connection);
                }
                MatchEffect::DespawnOwnedBy(connection) => {
                    let removed = self.spawner.despawn_owned_by(connection, &mut self.channel);
                    for entity_id in removed {
                        self.falls.remove(&entity_id);
                        self.pushes.remove(&entity_id);
                        self.send_direct(Recipient::All, WireMessage::EntityDespawned { entity_id });
                    }
                }
                MatchEffect::ScheduleCountdownTick(handle) => {
                    let interval = self.config.lifecycle.countdown_interval;
                    self.countdown_timer.arm(interval, handle);
                }
                MatchEffect::CancelCountdown => self.countdown_timer.disarm(),
                MatchEffect::Countdown(remaining) => {
                    self.presentation.on_countdown(remaining);
                    if self.machine.is_host() {
                        self.send_direct(Recipient::All, WireMessage::Countdown { remaining });
                    }
                }
                MatchEffect::SendEvent { event, to } => {
                    let sent = match to {
                        None => self.channel.send_event(event),
                        Some(connection) => self.channel.send_event_to(connection, event),
                    };
                    if let Err(error) = sent {
                        tracing::warn!(kind = %event.kind(), %error, "event not sent");
                    }
                }
                MatchEffect::SetWritesEnabled(enabled) => self.channel.set_writes_enabled(enabled),
                MatchEffect::ResetEntities => {
                    self.falls.clear();
                    self.pushes.clear();
                    if let Err(error) = self.spawner.reset_all(&mut self.channel) {
                        tracing::warn!(%error, "could not reset avatars");
                    }
                }
                MatchEffect::ReleaseEntities => {
                    self.spawner.release_all(&mut self.channel);
                    self.channel.unbind();
                    self.falls.clear();
                    self.pushes.clear();
                }
                MatchEffect::ConnectionTimedOut => {
                    let timeout = self.config.lifecycle.connection_timeout;
                    let error = NetworkError::ConnectionTimeout(timeout);
                    self.presentation.on_network_error(&error);
                    self.session.shutdown().await;
                }
            }
        }
    }

    fn status(&mut self, message: &str) {
        tracing::debug!(status = message);
        self.presentation.on_status(message);
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Sends every avatar to a joining client.
    fn announce_entities(&mut self, connection: ConnectionId) {
        let snapshots: Vec<EntitySnapshot> = self
            .spawner
            .iter()
            .map(|avatar| avatar.snapshot(&self.channel))
            .collect();
        for entity in snapshots {
            self.send_direct(
                Recipient::Connection(connection),
                WireMessage::EntitySpawned { entity },
            );
        }
    }

    /// Sends a message that bypasses the replication channel, after
    /// whatever the channel has queued so far.
    fn send_direct(&mut self, to: Recipient, message: WireMessage) {
        self.flush();
        if let Err(error) = self.session.send_to(to, &message) {
            tracing::debug!(?to, %error, "direct send failed");
        }
    }

    fn flush(&mut self) {
        for Outgoing { to, message } in self.channel.drain_outgoing() {
            if let Err(error) = self.session.send_to(to, &message) {
                tracing::debug!(?to, %error, "replicated send failed");
            }
        }
    }
}

/// Writes whichever of position and velocity changed.
fn write_motion(
    channel: &mut ReplicationChannel,
    avatar: &Entity,
    (position, velocity): (Vec3, Vec3),
    (next_position, next_velocity): (Vec3, Vec3),
) -> Result<(), ReplicationError> {
    if next_velocity != velocity {
        channel.set(avatar.velocity, next_velocity)?;
    }
    if next_position != position {
        channel.set(avatar.position, next_position)?;
    }
    Ok(())
}
