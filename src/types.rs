//! Shared primitive IDs, entity kinds, and the injectable clock.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// Identifier of a card, connection, connection type, or box.
pub type EntityId = String;
/// Identifier of the space (document) that owns the entities.
pub type SpaceId = String;
/// Identifier of the signed-in user.
pub type UserId = String;
/// Client-generated unique identifier of a queued operation.
pub type OperationId = String;
/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// The closed set of entity kinds held by a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// A card.
    Card,
    /// A connection between two cards or boxes.
    Connection,
    /// The visual style shared by connections.
    ConnectionType,
    /// A box grouping cards.
    Box,
}

impl EntityKind {
    /// camelCase name used in operation and action names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Connection => "connection",
            Self::ConnectionType => "connectionType",
            Self::Box => "box",
        }
    }

    /// Cards and boxes carry geometry that connection paths are anchored to.
    pub const fn is_positional(self) -> bool {
        matches!(self, Self::Card | Self::Box)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind plus id; unique across a whole space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity id.
    pub id: EntityId,
}

impl EntityKey {
    /// Builds a key from its parts.
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Time source injected into queue and runtime components.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> TimestampMs;
}

/// Wall-clock [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually advanced [`Clock`] for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Starts the clock at `now_ms`.
    pub fn new(now_ms: TimestampMs) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    /// Moves the clock forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.now.load(Ordering::SeqCst)
    }
}
