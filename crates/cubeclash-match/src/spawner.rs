//! Avatar spawning and the ownership registry.
//!
//! The authority creates both avatars and declares their replicated
//! fields. The host avatar is written by [`ConnectionId::SERVER`], the
//! client avatar by the client that joined. A client learns about avatars
//! from the authority's snapshots through [`EntitySpawner::adopt`].

use std::collections::BTreeMap;
use std::fmt;

use cubeclash_protocol::{
    AvatarRole, ConnectionId, EntityId, EntitySnapshot, ReplicatedField, Rotation, Transform, Vec3,
};
use cubeclash_replication::{ReplicatedVariable, ReplicationChannel};
use serde::{Deserialize, Serialize};

use crate::MatchError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Name of the template an avatar is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTemplate(pub String);

impl EntityTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Templates and spawn points of the two avatars.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// `None` makes spawning the host avatar fail.
    pub host_template: Option<EntityTemplate>,
    /// `None` makes spawning the client avatar fail.
    pub client_template: Option<EntityTemplate>,
    pub host_spawn: Vec3,
    pub client_spawn: Vec3,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            host_template: Some(EntityTemplate::new("Red Player")),
            client_template: Some(EntityTemplate::new("Blue Player")),
            host_spawn: Vec3::new(-3.0, 1.0, 0.0),
            client_spawn: Vec3::new(3.0, 1.0, 0.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A spawned avatar and the handles to its replicated fields.
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    /// The connection allowed to write the replicated fields.
    pub owner: ConnectionId,
    pub role: AvatarRole,
    pub template: EntityTemplate,
    pub position: ReplicatedVariable<Vec3>,
    pub rotation: ReplicatedVariable<Rotation>,
    pub velocity: ReplicatedVariable<Vec3>,
}

impl Entity {
    /// Current state as this participant sees it.
    pub fn snapshot(&self, channel: &ReplicationChannel) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            owner: self.owner,
            role: self.role,
            transform: Transform {
                position: channel.get(self.position).unwrap_or(Vec3::ZERO),
                rotation: channel.get(self.rotation).unwrap_or_default(),
            },
            velocity: channel.get(self.velocity).unwrap_or(Vec3::ZERO),
        }
    }
}

// ---------------------------------------------------------------------------
// EntitySpawner
// ---------------------------------------------------------------------------

/// Creates avatars and keeps track of who owns them.
#[derive(Debug)]
pub struct EntitySpawner {
    config: SpawnConfig,
    entities: BTreeMap<EntityId, Entity>,
    next_id: u64,
}

impl EntitySpawner {
    pub fn new(config: SpawnConfig) -> Self {
        Self {
            config,
            entities: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &SpawnConfig {
        &self.config
    }

    /// Fixed spawn point of an avatar role.
    pub fn spawn_point(&self, role: AvatarRole) -> Vec3 {
        match role {
            AvatarRole::HostAvatar => self.config.host_spawn,
            AvatarRole::ClientAvatar => self.config.client_spawn,
        }
    }

    /// Spawns the host avatar, written by the authority connection.
    ///
    /// # Errors
    /// - [`MatchError::NotAuthority`] on a client
    /// - [`MatchError::MissingEntityTemplate`] if no host template is set
    /// - [`MatchError::AlreadySpawned`] if the host avatar exists
    pub fn spawn_for_host(&mut self, channel: &mut ReplicationChannel) -> Result<&Entity, MatchError> {
        self.spawn(AvatarRole::HostAvatar, ConnectionId::SERVER, channel)
    }

    /// Spawns the client avatar, written by `connection`.
    ///
    /// # Errors
    /// Same as [`spawn_for_host`](Self::spawn_for_host).
    pub fn spawn_for_client(
        &mut self,
        connection: ConnectionId,
        channel: &mut ReplicationChannel,
    ) -> Result<&Entity, MatchError> {
        self.spawn(AvatarRole::ClientAvatar, connection, channel)
    }

    fn spawn(
        &mut self,
        role: AvatarRole,
        owner: ConnectionId,
        channel: &mut ReplicationChannel,
    ) -> Result<&Entity, MatchError> {
        if !channel.is_authority() {
            return Err(MatchError::NotAuthority);
        }
        let template = self.template_for(role)?;
        if self.by_role(role).is_some() {
            return Err(MatchError::AlreadySpawned(role));
        }

        let id = EntityId(self.next_id);
        self.next_id += 1;

        let snapshot = EntitySnapshot {
            id,
            owner,
            role,
            transform: Transform::at(self.spawn_point(role)),
            velocity: Vec3::ZERO,
        };
        tracing::info!(%id, %role, %owner, %template, "avatar spawned");
        Ok(self.register(snapshot, template, channel))
    }

    /// Registers an avatar announced by the authority (client side).
    ///
    /// An avatar with the same id is replaced.
    ///
    /// # Errors
    /// [`MatchError::MissingEntityTemplate`] if no template is set for the
    /// avatar's role.
    pub fn adopt(
        &mut self,
        snapshot: EntitySnapshot,
        channel: &mut ReplicationChannel,
    ) -> Result<&Entity, MatchError> {
        let template = self.template_for(snapshot.role)?;
        tracing::debug!(id = %snapshot.id, role = %snapshot.role, owner = %snapshot.owner, "avatar adopted");
        Ok(self.register(snapshot, template, channel))
    }

    fn template_for(&self, role: AvatarRole) -> Result<EntityTemplate, MatchError> {
        let template = match role {
            AvatarRole::HostAvatar => &self.config.host_template,
            AvatarRole::ClientAvatar => &self.config.client_template,
        };
        template.clone().ok_or_else(|| {
            tracing::error!(%role, "no entity template configured");
            MatchError::MissingEntityTemplate(role)
        })
    }

    fn register(
        &mut self,
        snapshot: EntitySnapshot,
        template: EntityTemplate,
        channel: &mut ReplicationChannel,
    ) -> &Entity {
        let EntitySnapshot {
            id,
            owner,
            role,
            transform,
            velocity,
        } = snapshot;

        let entity = Entity {
            id,
            owner,
            role,
            template,
            position: channel.declare(id, ReplicatedField::Position, owner, transform.position),
            rotation: channel.declare(id, ReplicatedField::Rotation, owner, transform.rotation),
            velocity: channel.declare(id, ReplicatedField::Velocity, owner, velocity),
        };
        self.entities.insert(id, entity);
        &self.entities[&id]
    }

    // -----------------------------------------------------------------------
    // Resets
    // -----------------------------------------------------------------------

    /// Puts an avatar back on its spawn point with zero velocity.
    ///
    /// The authority overrides whoever owns the avatar. Anyone else may
    /// only reset an avatar they own, through ordinary owner writes.
    ///
    /// # Errors
    /// - [`MatchError::UnknownEntity`] if there is no such avatar
    /// - [`MatchError::NotOwner`] for someone else's avatar on a client
    pub fn reset_entity(
        &self,
        id: EntityId,
        channel: &mut ReplicationChannel,
    ) -> Result<(), MatchError> {
        let entity = self.entities.get(&id).ok_or(MatchError::UnknownEntity(id))?;
        let spawn = self.spawn_point(entity.role);

        if channel.is_authority() {
            channel.force(entity.position, spawn)?;
            channel.force(entity.rotation, Rotation::IDENTITY)?;
            channel.force(entity.velocity, Vec3::ZERO)?;
        } else if channel.local() == Some(entity.owner) {
            channel.set(entity.position, spawn)?;
            channel.set(entity.rotation, Rotation::IDENTITY)?;
            channel.set(entity.velocity, Vec3::ZERO)?;
        } else {
            return Err(MatchError::NotOwner(id));
        }
        tracing::debug!(%id, role = %entity.role, "avatar reset");
        Ok(())
    }

    /// Resets every avatar this participant may reset: all of them on the
    /// authority, its own elsewhere.
    pub fn reset_all(&self, channel: &mut ReplicationChannel) -> Result<(), MatchError> {
        let local = channel.local();
        let authority = channel.is_authority();
        for entity in self.entities.values() {
            if authority || local == Some(entity.owner) {
                self.reset_entity(entity.id, channel)?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Removes an avatar and forgets its replicated fields.
    pub fn despawn(&mut self, id: EntityId, channel: &mut ReplicationChannel) -> Option<Entity> {
        let entity = self.entities.remove(&id)?;
        channel.forget_entity(id);
        tracing::info!(%id, role = %entity.role, "avatar despawned");
        Some(entity)
    }

    /// Removes every avatar owned by `owner`, returning their ids.
    pub fn despawn_owned_by(
        &mut self,
        owner: ConnectionId,
        channel: &mut ReplicationChannel,
    ) -> Vec<EntityId> {
        let ids: Vec<EntityId> = self.owned_by(owner).map(|e| e.id).collect();
        for id in &ids {
            self.despawn(*id, channel);
        }
        ids
    }

    /// Forgets every avatar. Ids start over.
    pub fn release_all(&mut self, channel: &mut ReplicationChannel) {
        for id in self.entities.keys() {
            channel.forget_entity(*id);
        }
        self.entities.clear();
        self.next_id = 1;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn by_role(&self, role: AvatarRole) -> Option<&Entity> {
        self.entities.values().find(|e| e.role == role)
    }

    pub fn owned_by(&self, owner: ConnectionId) -> impl Iterator<Item = &Entity> {
        self.entities.values().filter(move |e| e.owner == owner)
    }

    /// All avatars, by id.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use cubeclash_protocol::FieldValue;
    use cubeclash_replication::ReplicationConfig;

    use super::*;

    const CLIENT: ConnectionId = ConnectionId(1);

    fn host_channel() -> ReplicationChannel {
        ReplicationChannel::new(ConnectionId::SERVER, ReplicationConfig::default())
    }

    #[test]
    fn test_spawn_for_host_owned_by_authority_at_spawn_point() {
        let mut channel = host_channel();
        let mut spawner = EntitySpawner::new(SpawnConfig::default());

        let entity = spawner.spawn_for_host(&mut channel).unwrap().clone();
        assert_eq!(entity.owner, ConnectionId::SERVER);
        assert_eq!(entity.role, AvatarRole::HostAvatar);
        assert_eq!(entity.template.name(), "Red Player");
        assert_eq!(channel.get(entity.position), Some(Vec3::new(-3.0, 1.0, 0.0)));
        assert_eq!(
            channel.writer_of(entity.id, ReplicatedField::Velocity),
            Some(ConnectionId::SERVER)
        );
    }

    #[test]
    fn test_spawn_for_client_owned_by_joining_connection() {
        let mut channel = host_channel();
        let mut spawner = EntitySpawner::new(SpawnConfig::default());

        let entity = spawner.spawn_for_client(CLIENT, &mut channel).unwrap().clone();
        assert_eq!(entity.owner, CLIENT);
        assert_eq!(channel.get(entity.position), Some(Vec3::new(3.0, 1.0, 0.0)));
        assert!(!channel.is_owner(entity.position));
    }

    #[test]
    fn test_spawn_missing_template_fails() {
        let mut channel = host_channel();
        let mut spawner = EntitySpawner::new(SpawnConfig {
            client_template: None,
            ..SpawnConfig::default()
        });

        let err = spawner.spawn_for_client(CLIENT, &mut channel).unwrap_err();
        assert!(matches!(
            err,
            MatchError::MissingEntityTemplate(AvatarRole::ClientAvatar)
        ));
        assert!(spawner.is_empty());
        assert!(spawner.spawn_for_host(&mut channel).is_ok());
    }

    #[test]
    fn test_spawn_twice_is_already_spawned() {
        let mut channel = host_channel();
        let mut spawner = EntitySpawner::new(SpawnConfig::default());
        spawner.spawn_for_host(&mut channel).unwrap();
        assert!(matches!(
            spawner.spawn_for_host(&mut channel),
            Err(MatchError::AlreadySpawned(AvatarRole::HostAvatar))
        ));
    }

    #[test]
    fn test_spawn_on_client_is_not_authority() {
        let mut channel = ReplicationChannel::new(CLIENT, ReplicationConfig::default());
        let mut spawner = EntitySpawner::new(SpawnConfig::default());
        assert!(matches!(
            spawner.spawn_for_host(&mut channel),
            Err(MatchError::NotAuthority)
        ));
    }

    #[test]
    fn test_reset_entity_on_authority_overrides_owner() {
        let mut channel = host_channel();
        let mut spawner = EntitySpawner::new(SpawnConfig::default());
        let entity = spawner.spawn_for_client(CLIENT, &mut channel).unwrap().clone();
        channel
            .apply_update(
                CLIENT,
                entity.id,
                ReplicatedField::Velocity,
                4,
                FieldValue::Vec3(Vec3::new(1.0, 0.0, 0.0)),
            )
            .unwrap();

        spawner.reset_entity(entity.id, &mut channel).unwrap();
        assert_eq!(channel.get(entity.velocity), Some(Vec3::ZERO));
        assert_eq!(channel.drain_outgoing().len(), 3);
    }

    #[test]
    fn test_reset_entity_on_client_requires_ownership() {
        let mut host = host_channel();
        let mut host_spawner = EntitySpawner::new(SpawnConfig::default());
        let host_avatar = host_spawner.spawn_for_host(&mut host).unwrap().snapshot(&host);
        let client_avatar = host_spawner
            .spawn_for_client(CLIENT, &mut host)
            .unwrap()
            .snapshot(&host);

        let mut channel = ReplicationChannel::new(CLIENT, ReplicationConfig::default());
        channel.set_writes_enabled(true);
        let mut spawner = EntitySpawner::new(SpawnConfig::default());
        spawner.adopt(host_avatar, &mut channel).unwrap();
        spawner.adopt(client_avatar, &mut channel).unwrap();

        assert!(matches!(
            spawner.reset_entity(host_avatar.id, &mut channel),
            Err(MatchError::NotOwner(_))
        ));
        spawner.reset_entity(client_avatar.id, &mut channel).unwrap();

        spawner.reset_all(&mut channel).unwrap();
        assert_eq!(channel.drain_outgoing().len(), 6);
    }

    #[test]
    fn test_reset_unknown_entity() {
        let mut channel = host_channel();
        let spawner = EntitySpawner::new(SpawnConfig::default());
        assert!(matches!(
            spawner.reset_entity(EntityId(9), &mut channel),
            Err(MatchError::UnknownEntity(EntityId(9)))
        ));
    }

    #[test]
    fn test_despawn_owned_by_forgets_fields() {
        let mut channel = host_channel();
        let mut spawner = EntitySpawner::new(SpawnConfig::default());
        spawner.spawn_for_host(&mut channel).unwrap();
        let id = spawner.spawn_for_client(CLIENT, &mut channel).unwrap().id;

        assert_eq!(spawner.despawn_owned_by(CLIENT, &mut channel), vec![id]);
        assert_eq!(spawner.len(), 1);
        assert_eq!(channel.writer_of(id, ReplicatedField::Position), None);
        assert!(spawner.by_role(AvatarRole::ClientAvatar).is_none());

        spawner.spawn_for_client(ConnectionId(2), &mut channel).unwrap();
        assert_eq!(spawner.len(), 2);
    }

    #[test]
    fn test_release_all_restarts_ids() {
        let mut channel = host_channel();
        let mut spawner = EntitySpawner::new(SpawnConfig::default());
        spawner.spawn_for_host(&mut channel).unwrap();
        spawner.release_all(&mut channel);
        assert!(spawner.is_empty());
        assert_eq!(spawner.spawn_for_host(&mut channel).unwrap().id, EntityId(1));
    }

    #[test]
    fn test_snapshot_reflects_channel() {
        let mut channel = host_channel();
        channel.set_writes_enabled(true);
        let mut spawner = EntitySpawner::new(SpawnConfig::default());
        let entity = spawner.spawn_for_host(&mut channel).unwrap().clone();
        channel.set(entity.position, Vec3::new(0.0, 1.0, 0.0)).unwrap();

        let snapshot = entity.snapshot(&channel);
        assert_eq!(snapshot.transform.position, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(snapshot.owner, ConnectionId::SERVER);
    }
}
