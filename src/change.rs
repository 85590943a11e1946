//! Kind-erased entities, updates, and the store-level writes built from them.

use serde::{Deserialize, Serialize};

use crate::{
    entity::{
        BoxItem, BoxPatch, Card, CardPatch, Connection, ConnectionPatch, ConnectionType,
        ConnectionTypePatch, Entity, Update,
    },
    types::{EntityId, EntityKey, EntityKind},
};

/// Any entity of a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnyEntity {
    /// A card.
    Card(Card),
    /// A connection.
    Connection(Connection),
    /// A connection type.
    ConnectionType(ConnectionType),
    /// A box.
    Box(BoxItem),
}

impl AnyEntity {
    /// Kind plus id.
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Card(e) => e.key(),
            Self::Connection(e) => e.key(),
            Self::ConnectionType(e) => e.key(),
            Self::Box(e) => e.key(),
        }
    }

    /// Entity id.
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Card(e) => e.id(),
            Self::Connection(e) => e.id(),
            Self::ConnectionType(e) => e.id(),
            Self::Box(e) => e.id(),
        }
    }
}

/// A partial update to any entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum AnyUpdate {
    /// Card update.
    Card(Update<CardPatch>),
    /// Connection update.
    Connection(Update<ConnectionPatch>),
    /// Connection type update.
    ConnectionType(Update<ConnectionTypePatch>),
    /// Box update.
    Box(Update<BoxPatch>),
}

impl AnyUpdate {
    /// Kind plus id of the target.
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Card(u) => EntityKey::new(EntityKind::Card, u.id.clone()),
            Self::Connection(u) => EntityKey::new(EntityKind::Connection, u.id.clone()),
            Self::ConnectionType(u) => EntityKey::new(EntityKind::ConnectionType, u.id.clone()),
            Self::Box(u) => EntityKey::new(EntityKind::Box, u.id.clone()),
        }
    }
}

/// One write against the entity store.
///
/// User actions, history replay, and derived geometry all describe their
/// effects as `LocalChange`s so that the same value drives the store, the
/// history engine, and the operation queue.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalChange {
    /// Insert a new entity.
    Create(AnyEntity),
    /// Put back an entity that was removed.
    Restore(AnyEntity),
    /// Overwrite some fields of an existing entity.
    Update(AnyUpdate),
    /// Remove an entity.
    Remove(EntityKey),
}

impl LocalChange {
    /// Creation of `entity`.
    pub fn create<E: Entity>(entity: E) -> Self {
        Self::Create(entity.into_any())
    }

    /// Field update of entity `id`.
    pub fn update<E: Entity>(id: impl Into<EntityId>, patch: E::Patch) -> Self {
        Self::Update(E::update_into_any(Update::with(id, patch)))
    }

    /// Removal of entity `id`.
    pub fn remove<E: Entity>(id: impl Into<EntityId>) -> Self {
        Self::Remove(EntityKey::new(E::KIND, id))
    }

    /// Kind plus id of the entity written.
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Create(e) | Self::Restore(e) => e.key(),
            Self::Update(u) => u.key(),
            Self::Remove(key) => key.clone(),
        }
    }
}
