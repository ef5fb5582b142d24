use std::collections::{HashMap, VecDeque};

use cubeclash_protocol::{
    ConnectionId, EntityId, FieldValue, GameEvent, Recipient, ReplicatedField, Vec3, WireMessage,
};
use serde::{Deserialize, Serialize};

use crate::{Replicate, ReplicatedVariable, ReplicationError};

/// Tuning for replicated gameplay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Magnitude of the impulse the authority applies on a push.
    pub push_force: f32,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { push_force: 10.0 }
    }
}

/// A message the channel wants sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: Recipient,
    pub message: WireMessage,
}

/// Result of applying an incoming update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The shadow value changed.
    Applied,
    /// Not newer than what we already have; dropped.
    Stale,
}

#[derive(Debug)]
struct Slot {
    writer: ConnectionId,
    value: FieldValue,
    last_seq: u64,
    /// Last authority override of a field someone else writes.
    last_override: u64,
}

/// Replicated state and event routing for one participant.
///
/// The authority is always [`ConnectionId::SERVER`]. An unbound channel
/// is nobody: it owns nothing and is not the authority.
#[derive(Debug)]
pub struct ReplicationChannel {
    local: Option<ConnectionId>,
    writes_enabled: bool,
    slots: HashMap<(EntityId, ReplicatedField), Slot>,
    outbox: VecDeque<Outgoing>,
    applied: VecDeque<GameEvent>,
    config: ReplicationConfig,
}

impl ReplicationChannel {
    pub fn new(local: ConnectionId, config: ReplicationConfig) -> Self {
        let mut channel = Self::unbound(config);
        channel.local = Some(local);
        channel
    }

    /// A channel for a participant whose connection id is not known yet.
    pub fn unbound(config: ReplicationConfig) -> Self {
        Self {
            local: None,
            writes_enabled: false,
            slots: HashMap::new(),
            outbox: VecDeque::new(),
            applied: VecDeque::new(),
            config,
        }
    }

    /// Drops all state and starts over as `local`.
    pub fn rebind(&mut self, local: ConnectionId) {
        self.clear();
        self.local = Some(local);
    }

    /// Drops all state and forgets who we are.
    pub fn unbind(&mut self) {
        self.clear();
        self.local = None;
    }

    /// Forgets every field and pending message and disables writes.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.outbox.clear();
        self.applied.clear();
        self.writes_enabled = false;
    }

    /// Our connection id, `None` while unbound.
    pub fn local(&self) -> Option<ConnectionId> {
        self.local
    }

    pub fn authority(&self) -> ConnectionId {
        ConnectionId::SERVER
    }

    pub fn is_authority(&self) -> bool {
        self.local == Some(self.authority())
    }

    pub fn set_writes_enabled(&mut self, enabled: bool) {
        if self.writes_enabled != enabled {
            tracing::debug!(enabled, "replicated writes toggled");
        }
        self.writes_enabled = enabled;
    }

    pub fn writes_enabled(&self) -> bool {
        self.writes_enabled
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Fields
    // -----------------------------------------------------------------------

    /// Registers `field` of `entity` with its single writer and starting
    /// value. Declaring an existing field replaces it.
    pub fn declare<T: Replicate>(
        &mut self,
        entity: EntityId,
        field: ReplicatedField,
        writer: ConnectionId,
        initial: T,
    ) -> ReplicatedVariable<T> {
        self.slots.insert(
            (entity, field),
            Slot {
                writer,
                value: initial.into_value(),
                last_seq: 0,
                last_override: 0,
            },
        );
        tracing::trace!(%entity, %field, %writer, "field declared");
        ReplicatedVariable::new(entity, field)
    }

    /// Current local value (own or shadow).
    pub fn get<T: Replicate>(&self, var: ReplicatedVariable<T>) -> Option<T> {
        self.slots
            .get(&(var.entity(), var.field()))
            .and_then(|slot| T::from_value(slot.value))
    }

    /// The connection allowed to write a field.
    pub fn writer_of(&self, entity: EntityId, field: ReplicatedField) -> Option<ConnectionId> {
        self.slots.get(&(entity, field)).map(|slot| slot.writer)
    }

    pub fn is_owner<T>(&self, var: ReplicatedVariable<T>) -> bool {
        self.local
            .is_some_and(|local| self.writer_of(var.entity(), var.field()) == Some(local))
    }

    /// Last applied sequence number of a field.
    pub fn last_seq<T>(&self, var: ReplicatedVariable<T>) -> Option<u64> {
        self.slots
            .get(&(var.entity(), var.field()))
            .map(|slot| slot.last_seq)
    }

    /// Owner write: updates the local value and broadcasts it.
    ///
    /// # Errors
    /// - [`ReplicationError::NotOwner`] if we don't own the field
    /// - [`ReplicationError::WritesDisabled`] outside of play
    pub fn set<T: Replicate>(
        &mut self,
        var: ReplicatedVariable<T>,
        value: T,
    ) -> Result<(), ReplicationError> {
        let (entity, field) = (var.entity(), var.field());
        let slot = self
            .slots
            .get_mut(&(entity, field))
            .ok_or(ReplicationError::Undeclared { entity, field })?;

        if Some(slot.writer) != self.local {
            tracing::warn!(%entity, %field, owner = %slot.writer, "rejected write from non-owner");
            return Err(ReplicationError::NotOwner {
                entity,
                field,
                owner: slot.writer,
            });
        }
        if !self.writes_enabled {
            return Err(ReplicationError::WritesDisabled);
        }

        slot.last_seq += 1;
        slot.value = value.into_value();
        let message = WireMessage::ReplicatedUpdate {
            entity_id: entity,
            field,
            seq: slot.last_seq,
            value: slot.value,
        };
        self.outbox.push_back(Outgoing {
            to: Recipient::All,
            message,
        });
        Ok(())
    }

    /// Authority override: writes any field regardless of its owner or of
    /// whether writes are enabled, and broadcasts it.
    ///
    /// Overrides of a field someone else writes are numbered past both the
    /// owner's last update and the previous override.
    ///
    /// # Errors
    /// [`ReplicationError::NotAuthority`] on a non-authority participant.
    pub fn force<T: Replicate>(
        &mut self,
        var: ReplicatedVariable<T>,
        value: T,
    ) -> Result<(), ReplicationError> {
        if !self.is_authority() {
            return Err(ReplicationError::NotAuthority { kind: "force" });
        }
        let (entity, field) = (var.entity(), var.field());
        let slot = self
            .slots
            .get_mut(&(entity, field))
            .ok_or(ReplicationError::Undeclared { entity, field })?;

        if Some(slot.writer) == self.local {
            slot.last_seq += 1;
        } else {
            slot.last_seq = slot.last_seq.max(slot.last_override) + 1;
            slot.last_override = slot.last_seq;
        }
        slot.value = value.into_value();
        self.outbox.push_back(Outgoing {
            to: Recipient::All,
            message: WireMessage::ReplicatedUpdate {
                entity_id: entity,
                field,
                seq: slot.last_seq,
                value: slot.value,
            },
        });
        Ok(())
    }

    /// Applies an update received from `from` to the local shadow copy.
    ///
    /// Updates from the field's writer must carry a sequence number newer
    /// than the last one applied. Authority overrides of a field someone
    /// else writes must be newer than the last override, skip the writer's
    /// sequence check, and move the writer's sequence forward. Nothing is
    /// rebroadcast.
    ///
    /// # Errors
    /// [`ReplicationError::UnauthorizedWriter`] if `from` is neither the
    /// writer nor the authority, [`ReplicationError::Undeclared`] for an
    /// unknown field, [`ReplicationError::TypeMismatch`] for a value of
    /// the wrong kind.
    pub fn apply_update(
        &mut self,
        from: ConnectionId,
        entity: EntityId,
        field: ReplicatedField,
        seq: u64,
        value: FieldValue,
    ) -> Result<ApplyOutcome, ReplicationError> {
        let authority = self.authority();
        let slot = self
            .slots
            .get_mut(&(entity, field))
            .ok_or(ReplicationError::Undeclared { entity, field })?;

        if from != slot.writer && from != authority {
            tracing::warn!(%from, %entity, %field, "update from connection that does not own the field");
            return Err(ReplicationError::UnauthorizedWriter {
                from,
                entity,
                field,
            });
        }
        if std::mem::discriminant(&slot.value) != std::mem::discriminant(&value) {
            return Err(ReplicationError::TypeMismatch { entity, field });
        }

        let is_override = from == authority && from != slot.writer;
        let last = if is_override {
            slot.last_override
        } else {
            slot.last_seq
        };
        if seq <= last {
            tracing::trace!(%entity, %field, seq, last, is_override, "stale update dropped");
            return Ok(ApplyOutcome::Stale);
        }

        if is_override {
            slot.last_override = seq;
        }
        slot.value = value;
        slot.last_seq = slot.last_seq.max(seq);
        Ok(ApplyOutcome::Applied)
    }

    /// Forgets every field of `entity`.
    pub fn forget_entity(&mut self, entity: EntityId) {
        self.slots.retain(|(id, _), _| *id != entity);
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Sends a gameplay event from this participant.
    ///
    /// A push from a client is forwarded to the authority only; it takes
    /// effect when the authority's broadcast comes back. On the authority
    /// every event is broadcast and applied locally, with push impulses
    /// re-derived from the authority's own positions first.
    ///
    /// # Errors
    /// - [`ReplicationError::WritesDisabled`] for a push outside of play
    /// - [`ReplicationError::NotAuthority`] for any other kind sent by a client
    pub fn send_event(&mut self, event: GameEvent) -> Result<(), ReplicationError> {
        match event {
            GameEvent::PushImpulse { .. } if !self.writes_enabled => {
                Err(ReplicationError::WritesDisabled)
            }
            GameEvent::PushImpulse { .. } if !self.is_authority() => {
                self.outbox.push_back(Outgoing {
                    to: Recipient::Connection(self.authority()),
                    message: WireMessage::Event { event },
                });
                Ok(())
            }
            _ if !self.is_authority() => Err(ReplicationError::NotAuthority {
                kind: event.kind().as_str(),
            }),
            _ => {
                self.broadcast(self.authoritative(event));
                Ok(())
            }
        }
    }

    /// Sends an authority event to one connection only, without applying
    /// it locally.
    pub fn send_event_to(
        &mut self,
        to: ConnectionId,
        event: GameEvent,
    ) -> Result<(), ReplicationError> {
        if !self.is_authority() {
            return Err(ReplicationError::NotAuthority {
                kind: event.kind().as_str(),
            });
        }
        self.outbox.push_back(Outgoing {
            to: Recipient::Connection(to),
            message: WireMessage::Event { event },
        });
        Ok(())
    }

    /// Handles an event received from `from`.
    ///
    /// On the authority, a push request from a client is re-derived and
    /// broadcast. Everything else must come from the authority and is
    /// applied locally.
    pub fn receive_event(
        &mut self,
        from: ConnectionId,
        event: GameEvent,
    ) -> Result<(), ReplicationError> {
        if from == self.authority() {
            self.applied.push_back(event);
            return Ok(());
        }

        match event {
            GameEvent::PushImpulse { .. } if self.is_authority() => {
                if !self.writes_enabled {
                    tracing::debug!(%from, "push outside of play ignored");
                    return Err(ReplicationError::WritesDisabled);
                }
                self.broadcast(self.authoritative(event));
                Ok(())
            }
            _ => {
                tracing::warn!(%from, kind = %event.kind(), "event from non-authority rejected");
                Err(ReplicationError::NotAuthority {
                    kind: event.kind().as_str(),
                })
            }
        }
    }

    fn broadcast(&mut self, event: GameEvent) {
        tracing::debug!(kind = %event.kind(), "broadcasting event");
        self.outbox.push_back(Outgoing {
            to: Recipient::All,
            message: WireMessage::Event { event },
        });
        self.applied.push_back(event);
    }

    /// The authority's version of an event: a push impulse is recomputed
    /// from the two avatars' replicated positions.
    fn authoritative(&self, event: GameEvent) -> GameEvent {
        let GameEvent::PushImpulse {
            source,
            target,
            impulse,
        } = event
        else {
            return event;
        };

        let position = |entity| {
            self.slots
                .get(&(entity, ReplicatedField::Position))
                .and_then(|slot| Vec3::from_value(slot.value))
        };
        let force = self.config.push_force;
        let impulse = match (position(source), position(target)) {
            (Some(from), Some(to)) => (to - from)
                .normalized()
                .map(|direction| direction * force)
                .unwrap_or_else(|| impulse.clamp_length(force)),
            _ => impulse.clamp_length(force),
        };

        GameEvent::PushImpulse {
            source,
            target,
            impulse,
        }
    }

    // -----------------------------------------------------------------------
    // Draining
    // -----------------------------------------------------------------------

    /// Takes everything queued for sending, oldest first.
    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        self.outbox.drain(..).collect()
    }

    /// Takes the events that took effect on this participant, oldest first.
    pub fn take_applied_events(&mut self) -> Vec<GameEvent> {
        self.applied.drain(..).collect()
    }
}
