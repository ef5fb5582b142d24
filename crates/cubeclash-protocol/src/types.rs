//! Core protocol types for Cubeclash's wire format.
//!
//! Everything here is serialized and sent between the host and the client.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable identifier of one participant's connection.
///
/// Assigned by the host during the handshake. The host itself is always
/// [`ConnectionId::SERVER`] and is the authority for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// The host's own connection, which is the authority.
    pub const SERVER: ConnectionId = ConnectionId(0);

    pub fn is_server(self) -> bool {
        self == Self::SERVER
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifier of a spawned entity. Allocated by the authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Math
// ---------------------------------------------------------------------------

/// A 3D vector in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3::new(0.0, 0.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Vec3> {
        let len = self.length();
        if len <= f32::EPSILON {
            None
        } else {
            Some(self * (1.0 / len))
        }
    }

    /// Scales the vector down so its length is at most `max`.
    pub fn clamp_length(self, max: f32) -> Vec3 {
        let len = self.length();
        if len > max && len > f32::EPSILON {
            self * (max / len)
        } else {
            self
        }
    }

    /// Moves `self` toward `target` by at most `max_delta`.
    pub fn move_towards(self, target: Vec3, max_delta: f32) -> Vec3 {
        let delta = target - self;
        let dist = delta.length();
        if dist <= max_delta || dist <= f32::EPSILON {
            target
        } else {
            self + delta * (max_delta / dist)
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Vec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Orientation as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Rotation {
    pub const IDENTITY: Rotation = Rotation {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };
}

impl Default for Rotation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Position plus orientation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Rotation,
}

impl Transform {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            rotation: Rotation::IDENTITY,
        }
    }
}

// ---------------------------------------------------------------------------
// Entities and replicated state
// ---------------------------------------------------------------------------

/// Which of the two player avatars an entity is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvatarRole {
    HostAvatar,
    ClientAvatar,
}

impl fmt::Display for AvatarRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostAvatar => write!(f, "host avatar"),
            Self::ClientAvatar => write!(f, "client avatar"),
        }
    }
}

/// A field of an entity that is kept in sync across connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicatedField {
    Position,
    Rotation,
    Velocity,
}

impl fmt::Display for ReplicatedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Position => write!(f, "position"),
            Self::Rotation => write!(f, "rotation"),
            Self::Velocity => write!(f, "velocity"),
        }
    }
}

/// The value carried by a replicated update.
///
/// Serialized adjacently tagged: `{"kind": "Vec3", "data": {...}}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum FieldValue {
    Vec3(Vec3),
    Rotation(Rotation),
}

/// Everything a participant needs to mirror one entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub owner: ConnectionId,
    pub role: AvatarRole,
    pub transform: Transform,
    pub velocity: Vec3,
}

// ---------------------------------------------------------------------------
// Gameplay events
// ---------------------------------------------------------------------------

/// The discriminant of a [`GameEvent`], handy for logging and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PushImpulse,
    PlayerFell,
    GameStarted,
    GameRestarted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PushImpulse => "PushImpulse",
            Self::PlayerFell => "PlayerFell",
            Self::GameStarted => "GameStarted",
            Self::GameRestarted => "GameRestarted",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A discrete, fire-and-forget gameplay event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum GameEvent {
    /// `source` collided with `target`; the target's owner applies
    /// `impulse` to its velocity.
    PushImpulse {
        source: EntityId,
        target: EntityId,
        impulse: Vec3,
    },
    /// An avatar dropped below the arena floor.
    PlayerFell { entity: EntityId, role: AvatarRole },
    GameStarted,
    GameRestarted,
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PushImpulse { .. } => EventKind::PushImpulse,
            Self::PlayerFell { .. } => EventKind::PlayerFell,
            Self::GameStarted => EventKind::GameStarted,
            Self::GameRestarted => EventKind::GameRestarted,
        }
    }
}

// ---------------------------------------------------------------------------
// WireMessage
// ---------------------------------------------------------------------------

/// Everything that travels between host and client.
///
/// Internally tagged, so a message looks like
/// `{"type": "ConnectRequest", "version": 1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    // -- Connection lifecycle --
    /// Client → host: first message on a fresh link.
    ConnectRequest { version: u32 },

    /// Host → client: accepted, here is your connection id.
    ConnectAck { connection_id: ConnectionId },

    /// Either direction: the link is about to be closed.
    Disconnect { reason: String },

    // -- Replication --
    /// A new value for one replicated field. `seq` increases per field and
    /// per writer; receivers drop anything not newer than what they have.
    ReplicatedUpdate {
        entity_id: EntityId,
        field: ReplicatedField,
        seq: u64,
        value: FieldValue,
    },

    /// A gameplay event.
    Event { event: GameEvent },

    // -- Entity registry --
    /// Host → client: an entity exists, with this owner and pose.
    EntitySpawned { entity: EntitySnapshot },

    /// Host → client: an entity was released.
    EntityDespawned { entity_id: EntityId },

    // -- Match --
    /// Host → client: countdown ticks remaining before play starts.
    Countdown { remaining: u32 },
}

// ---------------------------------------------------------------------------
// Recipient
// ---------------------------------------------------------------------------

/// Who an outgoing message is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recipient {
    /// Every connected participant other than ourselves.
    All,
    /// One specific connection.
    Connection(ConnectionId),
    /// Everyone except the given connection.
    AllExcept(ConnectionId),
}

impl Recipient {
    /// Whether a message for this recipient should reach `connection`.
    pub fn includes(self, connection: ConnectionId) -> bool {
        match self {
            Self::All => true,
            Self::Connection(id) => id == connection,
            Self::AllExcept(id) => id != connection,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
