use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{
    change::{AnyEntity, AnyUpdate, LocalChange},
    entity::{
        BoxItem, Card, Connection, ConnectionPatch, ConnectionType, Entity, EntityPatch, Update,
    },
    types::{EntityId, EntityKey, EntityKind},
};

/// Rejected store-level write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The write targets an entity the store does not hold.
    #[error("no {0} in the space")]
    MissingEntity(EntityKey),
    /// A create targets an id that is already taken.
    #[error("{0} already exists")]
    AlreadyExists(EntityKey),
    /// The write is malformed.
    #[error("invalid change: {0}")]
    InvalidChange(String),
}

/// The entity store the history engine and runtime write through.
///
/// Implementations hold one table per [`EntityKind`]. [`Document`] is the
/// in-memory implementation; embedders wrap their own reactive store.
pub trait EntityStore {
    /// Looks up an entity by id.
    fn get<E: Entity>(&self, id: &str) -> Option<&E>;

    /// Inserts or replaces an entity.
    fn upsert<E: Entity>(&mut self, entity: E);

    /// Removes an entity, returning it when present.
    fn remove<E: Entity>(&mut self, id: &str) -> Option<E>;

    /// Ids of every entity of kind `E`, in no particular order.
    fn ids<E: Entity>(&self) -> Vec<EntityId>;

    /// Full clone of every table.
    fn snapshot(&self) -> Document;

    /// Recomputes geometry derived from the entity at `key` and returns the
    /// resulting writes. Called after every write except removals.
    fn refresh_derived(&mut self, _key: &EntityKey) -> Vec<LocalChange> {
        Vec::new()
    }
}

/// In-memory space contents keyed by id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    pub(crate) cards: HashMap<EntityId, Card>,
    pub(crate) connections: HashMap<EntityId, Connection>,
    pub(crate) connection_types: HashMap<EntityId, ConnectionType>,
    pub(crate) boxes: HashMap<EntityId, BoxItem>,
}

impl Document {
    /// Empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a document from entity lists, last duplicate wins.
    pub fn from_entities(entities: impl IntoIterator<Item = AnyEntity>) -> Self {
        let mut doc = Self::new();
        for entity in entities {
            doc.upsert_any(entity);
        }
        doc
    }

    /// All cards.
    pub fn cards(&self) -> &HashMap<EntityId, Card> {
        &self.cards
    }

    /// All connections.
    pub fn connections(&self) -> &HashMap<EntityId, Connection> {
        &self.connections
    }

    /// All connection types.
    pub fn connection_types(&self) -> &HashMap<EntityId, ConnectionType> {
        &self.connection_types
    }

    /// All boxes.
    pub fn boxes(&self) -> &HashMap<EntityId, BoxItem> {
        &self.boxes
    }

    /// Total number of entities across all tables.
    pub fn len(&self) -> usize {
        self.cards.len() + self.connections.len() + self.connection_types.len() + self.boxes.len()
    }

    /// True when every table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up any entity by key.
    pub fn get_any(&self, key: &EntityKey) -> Option<AnyEntity> {
        lookup(self, key)
    }

    /// Inserts or replaces any entity.
    pub fn upsert_any(&mut self, entity: AnyEntity) {
        match entity {
            AnyEntity::Card(e) => self.upsert(e),
            AnyEntity::Connection(e) => self.upsert(e),
            AnyEntity::ConnectionType(e) => self.upsert(e),
            AnyEntity::Box(e) => self.upsert(e),
        }
    }

    fn anchor_of(&self, item_id: &str) -> Option<(f64, f64)> {
        self.cards
            .get(item_id)
            .map(Card::anchor)
            .or_else(|| self.boxes.get(item_id).map(BoxItem::anchor))
    }
}

impl EntityStore for Document {
    fn get<E: Entity>(&self, id: &str) -> Option<&E> {
        E::table(self).get(id)
    }

    fn upsert<E: Entity>(&mut self, entity: E) {
        E::table_mut(self).insert(entity.id().clone(), entity);
    }

    fn remove<E: Entity>(&mut self, id: &str) -> Option<E> {
        E::table_mut(self).remove(id)
    }

    fn ids<E: Entity>(&self) -> Vec<EntityId> {
        E::table(self).keys().cloned().collect()
    }

    fn snapshot(&self) -> Document {
        self.clone()
    }

    fn refresh_derived(&mut self, key: &EntityKey) -> Vec<LocalChange> {
        let anchored: Vec<EntityId> = match key.kind {
            EntityKind::Connection => vec![key.id.clone()],
            kind if kind.is_positional() => {
                let mut ids: Vec<EntityId> = self
                    .connections
                    .values()
                    .filter(|c| c.start_item_id == key.id || c.end_item_id == key.id)
                    .map(|c| c.id.clone())
                    .collect();
                ids.sort();
                ids
            }
            _ => return Vec::new(),
        };

        let mut out = Vec::new();
        for id in anchored {
            let Some(conn) = self.connections.get(&id) else {
                continue;
            };
            let (Some(start), Some(end)) = (
                self.anchor_of(&conn.start_item_id),
                self.anchor_of(&conn.end_item_id),
            ) else {
                continue;
            };
            let path = Connection::path_between(start, end);
            if conn.path == path {
                continue;
            }
            if let Some(conn) = self.connections.get_mut(&id) {
                conn.path = path.clone();
            }
            out.push(LocalChange::Update(AnyUpdate::Connection(Update::with(
                id,
                ConnectionPatch {
                    path: Some(path),
                    ..ConnectionPatch::default()
                },
            ))));
        }

        if !out.is_empty() {
            debug!(item = %key, updated = out.len(), "refreshed connection paths");
        }
        out
    }
}

/// Name given to a connection type created to host a restored connection.
pub const FALLBACK_CONNECTION_TYPE_NAME: &str = "Connection";

/// Points an entity about to be restored at referenced entities that exist.
///
/// A connection whose type is gone takes the lowest existing type id. When
/// the space has no types at all, one is created and its creation is
/// returned so it gets queued ahead of the connection.
pub fn repair_references<S: EntityStore>(
    store: &mut S,
    entity: &mut AnyEntity,
) -> Vec<LocalChange> {
    let AnyEntity::Connection(connection) = entity else {
        return Vec::new();
    };
    if store
        .get::<ConnectionType>(&connection.connection_type_id)
        .is_some()
    {
        return Vec::new();
    }

    let fallback = store.ids::<ConnectionType>().into_iter().min();
    if let Some(type_id) = fallback {
        debug!(
            connection = %connection.id,
            missing = %connection.connection_type_id,
            fallback = %type_id,
            "restored connection moved to an existing type"
        );
        connection.connection_type_id = type_id;
        return Vec::new();
    }

    let created = ConnectionType {
        id: Uuid::new_v4().to_string(),
        name: FALLBACK_CONNECTION_TYPE_NAME.to_string(),
        ..ConnectionType::default()
    };
    debug!(
        connection = %connection.id,
        created = %created.id,
        "no connection types left; creating one for the restored connection"
    );
    connection.connection_type_id = created.id.clone();
    store.upsert(created.clone());
    vec![LocalChange::Create(created.into_any())]
}

/// Applies one write to `store`.
///
/// Returns the write itself followed by any derived writes it triggered.
pub fn apply_change<S: EntityStore>(
    store: &mut S,
    change: &LocalChange,
) -> Result<Vec<LocalChange>, StoreError> {
    let key = change.key();
    if key.id.is_empty() {
        return Err(StoreError::InvalidChange(format!("{} with empty id", key.kind)));
    }

    match change {
        LocalChange::Create(entity) => {
            if contains(store, &key) {
                return Err(StoreError::AlreadyExists(key));
            }
            upsert_any(store, entity.clone());
        }
        LocalChange::Restore(entity) => upsert_any(store, entity.clone()),
        LocalChange::Update(update) => match update {
            AnyUpdate::Card(u) => patch_entity::<S, Card>(store, u)?,
            AnyUpdate::Connection(u) => patch_entity::<S, Connection>(store, u)?,
            AnyUpdate::ConnectionType(u) => patch_entity::<S, ConnectionType>(store, u)?,
            AnyUpdate::Box(u) => patch_entity::<S, BoxItem>(store, u)?,
        },
        LocalChange::Remove(key) => {
            let removed = match key.kind {
                EntityKind::Card => store.remove::<Card>(&key.id).is_some(),
                EntityKind::Connection => store.remove::<Connection>(&key.id).is_some(),
                EntityKind::ConnectionType => store.remove::<ConnectionType>(&key.id).is_some(),
                EntityKind::Box => store.remove::<BoxItem>(&key.id).is_some(),
            };
            if !removed {
                return Err(StoreError::MissingEntity(key.clone()));
            }
        }
    }

    let mut out = vec![change.clone()];
    if !matches!(change, LocalChange::Remove(_)) {
        out.extend(store.refresh_derived(&key));
    }
    Ok(out)
}

/// True when `store` holds an entity with `key`.
pub fn contains<S: EntityStore>(store: &S, key: &EntityKey) -> bool {
    match key.kind {
        EntityKind::Card => store.get::<Card>(&key.id).is_some(),
        EntityKind::Connection => store.get::<Connection>(&key.id).is_some(),
        EntityKind::ConnectionType => store.get::<ConnectionType>(&key.id).is_some(),
        EntityKind::Box => store.get::<BoxItem>(&key.id).is_some(),
    }
}

/// Clone of the entity at `key`, if `store` holds one.
pub fn lookup<S: EntityStore>(store: &S, key: &EntityKey) -> Option<AnyEntity> {
    match key.kind {
        EntityKind::Card => store.get::<Card>(&key.id).cloned().map(Entity::into_any),
        EntityKind::Connection => store.get::<Connection>(&key.id).cloned().map(Entity::into_any),
        EntityKind::ConnectionType => store
            .get::<ConnectionType>(&key.id)
            .cloned()
            .map(Entity::into_any),
        EntityKind::Box => store.get::<BoxItem>(&key.id).cloned().map(Entity::into_any),
    }
}

fn upsert_any<S: EntityStore>(store: &mut S, entity: AnyEntity) {
    match entity {
        AnyEntity::Card(e) => store.upsert(e),
        AnyEntity::Connection(e) => store.upsert(e),
        AnyEntity::ConnectionType(e) => store.upsert(e),
        AnyEntity::Box(e) => store.upsert(e),
    }
}

fn patch_entity<S: EntityStore, E: Entity>(
    store: &mut S,
    update: &Update<E::Patch>,
) -> Result<(), StoreError> {
    let mut current = store
        .get::<E>(&update.id)
        .cloned()
        .ok_or_else(|| StoreError::MissingEntity(EntityKey::new(E::KIND, update.id.clone())))?;
    update.patch.apply_to(&mut current);
    store.upsert(current);
    Ok(())
}
