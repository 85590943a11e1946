use std::fmt;

use tracing::debug;

use crate::{
    change::{AnyEntity, LocalChange},
    core::document::{EntityStore, repair_references},
    entity::{BoxItem, Card, Connection, ConnectionType, Entity, EntityPatch, Update},
    types::{EntityId, EntityKey, EntityKind},
};

/// Which way a patch is replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Write back `prev`.
    Undo,
    /// Write `new` again.
    Redo,
}

/// A reversible change to one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<E: Entity> {
    /// The entity was created.
    Created {
        /// Entity as created.
        new: E,
    },
    /// Some history fields changed.
    Updated {
        /// Entity id.
        id: EntityId,
        /// Values before the change.
        prev: E::Patch,
        /// Values after the change.
        new: E::Patch,
    },
    /// The entity was removed.
    Removed {
        /// Entity as it was before removal.
        prev: E,
    },
}

impl<E: Entity> Change<E> {
    /// Change that takes an entity from `prev` to `next`, or `None` when no
    /// history field differs.
    pub fn between(prev: Option<&E>, next: Option<&E>) -> Option<Self> {
        match (prev, next) {
            (None, Some(new)) => Some(Self::Created { new: new.clone() }),
            (Some(prev), None) => Some(Self::Removed { prev: prev.clone() }),
            (Some(prev), Some(next)) => {
                let (before, after) = E::Patch::diff_significant(prev, next);
                if after.is_empty() {
                    return None;
                }
                Some(Self::Updated {
                    id: next.id().clone(),
                    prev: before,
                    new: after,
                })
            }
            (None, None) => None,
        }
    }

    /// Target entity id.
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Created { new } => new.id(),
            Self::Updated { id, .. } => id,
            Self::Removed { prev } => prev.id(),
        }
    }

    /// Replays this change against `store`.
    ///
    /// Entities that are removed during replay are captured back into the
    /// change so that replaying the opposite direction restores them
    /// exactly. A missing target makes the replay a no-op. Restoring an
    /// entity first repairs references it holds to entities that are gone.
    pub fn apply<S: EntityStore>(
        &mut self,
        store: &mut S,
        direction: Direction,
    ) -> Vec<LocalChange> {
        match (self, direction) {
            (Self::Created { new: entity }, Direction::Undo)
            | (Self::Removed { prev: entity }, Direction::Redo) => {
                let key = entity.key();
                let Some(current) = store.remove::<E>(entity.id()) else {
                    debug!(entity = %key, "replay target already gone");
                    return Vec::new();
                };
                *entity = current;
                vec![LocalChange::Remove(key)]
            }
            (Self::Created { new: entity }, Direction::Redo)
            | (Self::Removed { prev: entity }, Direction::Undo) => {
                let mut restored = entity.clone().into_any();
                let mut out = repair_references(store, &mut restored);
                if let Some(repaired) = E::from_any(restored) {
                    *entity = repaired;
                }
                store.upsert(entity.clone());
                out.push(LocalChange::Restore(entity.clone().into_any()));
                out
            }
            (Self::Updated { id, prev, new }, direction) => {
                let patch = match direction {
                    Direction::Undo => prev,
                    Direction::Redo => new,
                };
                let Some(mut current) = store.get::<E>(id).cloned() else {
                    debug!(entity = %EntityKey::new(E::KIND, id.clone()), "replay target missing");
                    return Vec::new();
                };
                patch.apply_to(&mut current);
                store.upsert(current);
                vec![LocalChange::Update(E::update_into_any(Update::with(
                    id.clone(),
                    patch.clone(),
                )))]
            }
        }
    }

    fn verb(&self) -> ActionVerb {
        match self {
            Self::Created { .. } => ActionVerb::Created,
            Self::Updated { .. } => ActionVerb::Updated,
            Self::Removed { .. } => ActionVerb::Removed,
        }
    }
}

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionVerb {
    /// Created.
    Created,
    /// Fields updated.
    Updated,
    /// Removed.
    Removed,
}

/// Kind plus verb, displayed as e.g. `cardUpdated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionKind {
    /// Entity kind.
    pub kind: EntityKind,
    /// Verb.
    pub verb: ActionVerb,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.verb {
            ActionVerb::Created => "Created",
            ActionVerb::Updated => "Updated",
            ActionVerb::Removed => "Removed",
        };
        write!(f, "{}{}", self.kind, verb)
    }
}

/// A [`Change`] to an entity of any kind.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Patch {
    Card(Change<Card>),
    Connection(Change<Connection>),
    ConnectionType(Change<ConnectionType>),
    Box(Change<BoxItem>),
}

/// One undoable batch.
pub type PatchSet = Vec<Patch>;

impl Patch {
    /// Patch taking the entity at `key` from `prev` to `next`.
    ///
    /// Returns `None` when nothing significant changed or when a value is of
    /// a different kind than `key`.
    pub fn between(
        key: &EntityKey,
        prev: Option<AnyEntity>,
        next: Option<AnyEntity>,
    ) -> Option<Self> {
        fn typed<E: Entity>(prev: Option<AnyEntity>, next: Option<AnyEntity>) -> Option<Patch> {
            let prev = prev.and_then(E::from_any);
            let next = next.and_then(E::from_any);
            Change::<E>::between(prev.as_ref(), next.as_ref()).map(E::change_into_patch)
        }

        match key.kind {
            EntityKind::Card => typed::<Card>(prev, next),
            EntityKind::Connection => typed::<Connection>(prev, next),
            EntityKind::ConnectionType => typed::<ConnectionType>(prev, next),
            EntityKind::Box => typed::<BoxItem>(prev, next),
        }
    }

    /// Action name, e.g. `cardUpdated`.
    pub fn action(&self) -> ActionKind {
        let (kind, verb) = match self {
            Self::Card(c) => (EntityKind::Card, c.verb()),
            Self::Connection(c) => (EntityKind::Connection, c.verb()),
            Self::ConnectionType(c) => (EntityKind::ConnectionType, c.verb()),
            Self::Box(c) => (EntityKind::Box, c.verb()),
        };
        ActionKind { kind, verb }
    }

    /// Kind plus id of the target entity.
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Card(c) => EntityKey::new(EntityKind::Card, c.id().clone()),
            Self::Connection(c) => EntityKey::new(EntityKind::Connection, c.id().clone()),
            Self::ConnectionType(c) => EntityKey::new(EntityKind::ConnectionType, c.id().clone()),
            Self::Box(c) => EntityKey::new(EntityKind::Box, c.id().clone()),
        }
    }

    /// Replays the patch, then recomputes geometry derived from a positional
    /// target. Returns every write made, derived ones included.
    pub fn apply<S: EntityStore>(
        &mut self,
        store: &mut S,
        direction: Direction,
    ) -> Vec<LocalChange> {
        let written = match self {
            Self::Card(c) => c.apply(store, direction),
            Self::Connection(c) => c.apply(store, direction),
            Self::ConnectionType(c) => c.apply(store, direction),
            Self::Box(c) => c.apply(store, direction),
        };
        let mut out = Vec::with_capacity(written.len());
        for change in written {
            let derived = match &change {
                LocalChange::Remove(_) => Vec::new(),
                other => store.refresh_derived(&other.key()),
            };
            out.push(change);
            out.extend(derived);
        }
        out
    }
}
