//! Remote mutation operations and the session they are issued under.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    change::{AnyEntity, AnyUpdate, LocalChange},
    entity::{
        BoxItem, BoxPatch, Card, CardPatch, Connection, ConnectionPatch, ConnectionType,
        ConnectionTypePatch, EntityPatch, EntityRef, Update,
    },
    types::{Clock, EntityId, EntityKind, OperationId, SpaceId, TimestampMs, UserId},
};

/// Version number for serialized [`StoredOperationEnvelope`] payloads.
pub const OP_FORMAT_VERSION: u16 = 1;

/// Name of a remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum OperationKind {
    CreateCard,
    UpdateCard,
    RemoveCard,
    RestoreRemovedCard,
    DeleteCard,
    DeleteAllRemovedCards,
    CreateConnection,
    UpdateConnection,
    RemoveConnection,
    CreateConnectionType,
    UpdateConnectionType,
    RemoveConnectionType,
    CreateBox,
    UpdateBox,
    RemoveBox,
    UpdateUserCardsCreatedCount,
    UpdateUserCardsCreatedCountRaw,
}

impl OperationKind {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateCard => "createCard",
            Self::UpdateCard => "updateCard",
            Self::RemoveCard => "removeCard",
            Self::RestoreRemovedCard => "restoreRemovedCard",
            Self::DeleteCard => "deleteCard",
            Self::DeleteAllRemovedCards => "deleteAllRemovedCards",
            Self::CreateConnection => "createConnection",
            Self::UpdateConnection => "updateConnection",
            Self::RemoveConnection => "removeConnection",
            Self::CreateConnectionType => "createConnectionType",
            Self::UpdateConnectionType => "updateConnectionType",
            Self::RemoveConnectionType => "removeConnectionType",
            Self::CreateBox => "createBox",
            Self::UpdateBox => "updateBox",
            Self::RemoveBox => "removeBox",
            Self::UpdateUserCardsCreatedCount => "updateUserCardsCreatedCount",
            Self::UpdateUserCardsCreatedCountRaw => "updateUserCardsCreatedCountRaw",
        }
    }

    /// Pure-delta counters are merged into a single pending operation.
    pub const fn is_counter(self) -> bool {
        matches!(
            self,
            Self::UpdateUserCardsCreatedCount | Self::UpdateUserCardsCreatedCountRaw
        )
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a counter adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountDelta {
    /// Signed adjustment.
    pub delta: i64,
}

/// Operation payload, tagged by operation name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "body", rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum OperationBody {
    CreateCard(Card),
    UpdateCard(Update<CardPatch>),
    RemoveCard(EntityRef),
    RestoreRemovedCard(Card),
    DeleteCard(EntityRef),
    DeleteAllRemovedCards,
    CreateConnection(Connection),
    UpdateConnection(Update<ConnectionPatch>),
    RemoveConnection(EntityRef),
    CreateConnectionType(ConnectionType),
    UpdateConnectionType(Update<ConnectionTypePatch>),
    RemoveConnectionType(EntityRef),
    CreateBox(BoxItem),
    UpdateBox(Update<BoxPatch>),
    RemoveBox(EntityRef),
    UpdateUserCardsCreatedCount(CountDelta),
    UpdateUserCardsCreatedCountRaw(CountDelta),
}

impl OperationBody {
    /// Operation name.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateCard(_) => OperationKind::CreateCard,
            Self::UpdateCard(_) => OperationKind::UpdateCard,
            Self::RemoveCard(_) => OperationKind::RemoveCard,
            Self::RestoreRemovedCard(_) => OperationKind::RestoreRemovedCard,
            Self::DeleteCard(_) => OperationKind::DeleteCard,
            Self::DeleteAllRemovedCards => OperationKind::DeleteAllRemovedCards,
            Self::CreateConnection(_) => OperationKind::CreateConnection,
            Self::UpdateConnection(_) => OperationKind::UpdateConnection,
            Self::RemoveConnection(_) => OperationKind::RemoveConnection,
            Self::CreateConnectionType(_) => OperationKind::CreateConnectionType,
            Self::UpdateConnectionType(_) => OperationKind::UpdateConnectionType,
            Self::RemoveConnectionType(_) => OperationKind::RemoveConnectionType,
            Self::CreateBox(_) => OperationKind::CreateBox,
            Self::UpdateBox(_) => OperationKind::UpdateBox,
            Self::RemoveBox(_) => OperationKind::RemoveBox,
            Self::UpdateUserCardsCreatedCount(_) => OperationKind::UpdateUserCardsCreatedCount,
            Self::UpdateUserCardsCreatedCountRaw(_) => OperationKind::UpdateUserCardsCreatedCountRaw,
        }
    }

    /// Target entity id; `None` for bulk and counter operations.
    pub fn entity_id(&self) -> Option<&EntityId> {
        match self {
            Self::CreateCard(e) | Self::RestoreRemovedCard(e) => Some(&e.id),
            Self::CreateConnection(e) => Some(&e.id),
            Self::CreateConnectionType(e) => Some(&e.id),
            Self::CreateBox(e) => Some(&e.id),
            Self::UpdateCard(u) => Some(&u.id),
            Self::UpdateConnection(u) => Some(&u.id),
            Self::UpdateConnectionType(u) => Some(&u.id),
            Self::UpdateBox(u) => Some(&u.id),
            Self::RemoveCard(r)
            | Self::DeleteCard(r)
            | Self::RemoveConnection(r)
            | Self::RemoveConnectionType(r)
            | Self::RemoveBox(r) => Some(&r.id),
            Self::DeleteAllRemovedCards
            | Self::UpdateUserCardsCreatedCount(_)
            | Self::UpdateUserCardsCreatedCountRaw(_) => None,
        }
    }

    /// Merges a later body with the same name and target into `self`.
    ///
    /// Updates merge field by field (later fields win, absent fields are
    /// kept); counters sum their deltas; every other body is replaced.
    pub fn merge(&mut self, later: OperationBody) {
        match (self, later) {
            (Self::UpdateCard(a), Self::UpdateCard(b)) => a.patch.merge(b.patch),
            (Self::UpdateConnection(a), Self::UpdateConnection(b)) => a.patch.merge(b.patch),
            (Self::UpdateConnectionType(a), Self::UpdateConnectionType(b)) => a.patch.merge(b.patch),
            (Self::UpdateBox(a), Self::UpdateBox(b)) => a.patch.merge(b.patch),
            (Self::UpdateUserCardsCreatedCount(a), Self::UpdateUserCardsCreatedCount(b))
            | (Self::UpdateUserCardsCreatedCountRaw(a), Self::UpdateUserCardsCreatedCountRaw(b)) => {
                a.delta += b.delta;
            }
            (this, later) => *this = later,
        }
    }
}

/// Squash identity: operation name plus target entity id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OperationIdentity {
    /// Operation name.
    pub kind: OperationKind,
    /// Target entity id, if any.
    pub entity_id: Option<EntityId>,
}

/// A queued remote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Name and payload.
    #[serde(flatten)]
    pub body: OperationBody,
    /// Client-generated unique id.
    pub operation_id: OperationId,
    /// Space the operation applies to.
    pub space_id: SpaceId,
    /// User issuing the operation.
    pub user_id: UserId,
    /// Client time the operation was created.
    pub client_created_at: TimestampMs,
}

impl Operation {
    /// Stamps `body` with a fresh id, the session's space and user, and the
    /// current time.
    pub fn new(body: OperationBody, session: &Session, clock: &dyn Clock) -> Self {
        Self {
            body,
            operation_id: Uuid::new_v4().to_string(),
            space_id: session.space_id.clone(),
            user_id: session.user_id.clone(),
            client_created_at: clock.now_ms(),
        }
    }

    /// Operation name.
    pub fn kind(&self) -> OperationKind {
        self.body.kind()
    }

    /// Squash identity.
    pub fn identity(&self) -> OperationIdentity {
        OperationIdentity {
            kind: self.kind(),
            entity_id: self.body.entity_id().cloned(),
        }
    }

    /// Folds a later operation with the same identity into `self`.
    ///
    /// The merged operation carries the later operation's id and metadata.
    pub fn merge_from(&mut self, later: Operation) {
        self.body.merge(later.body);
        self.operation_id = later.operation_id;
        self.space_id = later.space_id;
        self.user_id = later.user_id;
        self.client_created_at = later.client_created_at;
    }
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOperationEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped operation.
    pub operation: Operation,
}

impl StoredOperationEnvelope {
    /// Constructs an envelope using [`OP_FORMAT_VERSION`].
    pub fn new(operation: Operation) -> Self {
        Self {
            format_version: OP_FORMAT_VERSION,
            operation,
        }
    }
}

/// Who is editing which space, and whether the server is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    /// Signed-in user id.
    pub user_id: UserId,
    /// Current space id.
    pub space_id: SpaceId,
    /// API key; `None` when signed out.
    pub api_key: Option<String>,
    /// Last known connectivity.
    pub is_online: bool,
}

impl Session {
    /// A signed-in, online session.
    pub fn signed_in(
        user_id: impl Into<UserId>,
        space_id: impl Into<SpaceId>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            space_id: space_id.into(),
            api_key: Some(api_key.into()),
            is_online: true,
        }
    }

    /// True when an API key is present.
    pub fn is_signed_in(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// True when a batch may be sent right now.
    pub fn can_send(&self) -> bool {
        self.is_online && self.is_signed_in()
    }
}

/// Operation bodies that replicate `change` on the server.
///
/// Card creation, restoration, and removal also adjust the user's
/// cards-created counter.
pub fn operations_for(change: &LocalChange) -> Vec<OperationBody> {
    match change {
        LocalChange::Create(entity) => match entity {
            AnyEntity::Card(card) => vec![
                OperationBody::CreateCard(card.clone()),
                OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: 1 }),
            ],
            AnyEntity::Connection(c) => vec![OperationBody::CreateConnection(c.clone())],
            AnyEntity::ConnectionType(t) => vec![OperationBody::CreateConnectionType(t.clone())],
            AnyEntity::Box(b) => vec![OperationBody::CreateBox(b.clone())],
        },
        LocalChange::Restore(entity) => match entity {
            AnyEntity::Card(card) => vec![
                OperationBody::RestoreRemovedCard(card.clone()),
                OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: 1 }),
            ],
            AnyEntity::Connection(c) => vec![OperationBody::CreateConnection(c.clone())],
            AnyEntity::ConnectionType(t) => vec![OperationBody::CreateConnectionType(t.clone())],
            AnyEntity::Box(b) => vec![OperationBody::CreateBox(b.clone())],
        },
        LocalChange::Update(update) => match update {
            AnyUpdate::Card(u) => vec![OperationBody::UpdateCard(u.clone())],
            AnyUpdate::Connection(u) => vec![OperationBody::UpdateConnection(u.clone())],
            AnyUpdate::ConnectionType(u) => vec![OperationBody::UpdateConnectionType(u.clone())],
            AnyUpdate::Box(u) => vec![OperationBody::UpdateBox(u.clone())],
        },
        LocalChange::Remove(key) => {
            let target = EntityRef { id: key.id.clone() };
            match key.kind {
                EntityKind::Card => vec![
                    OperationBody::RemoveCard(target),
                    OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: -1 }),
                ],
                EntityKind::Connection => vec![OperationBody::RemoveConnection(target)],
                EntityKind::ConnectionType => vec![OperationBody::RemoveConnectionType(target)],
                EntityKind::Box => vec![OperationBody::RemoveBox(target)],
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManualClock;

    fn session() -> Session {
        Session::signed_in("u1", "s1", "key")
    }

    #[test]
    fn wire_format_carries_name_body_and_metadata() {
        let clock = ManualClock::new(1_000);
        let op = Operation::new(
            OperationBody::UpdateCard(Update::with(
                "c1",
                CardPatch {
                    name: Some("hi".to_string()),
                    ..CardPatch::default()
                },
            )),
            &session(),
            &clock,
        );
        let json = serde_json::to_value(&op).expect("serialize");
        assert_eq!(json["name"], "updateCard");
        assert_eq!(json["body"], serde_json::json!({ "id": "c1", "name": "hi" }));
        assert_eq!(json["spaceId"], "s1");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["clientCreatedAt"], 1_000);

        let back: Operation = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, op);
    }

    #[test]
    fn counter_bodies_sum_on_merge() {
        let mut body = OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: 1 });
        body.merge(OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: -3 }));
        assert_eq!(body, OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: -2 }));
    }

    #[test]
    fn card_removal_also_decrements_counter() {
        let ops = operations_for(&LocalChange::remove::<Card>("c1"));
        let kinds: Vec<_> = ops.iter().map(OperationBody::kind).collect();
        assert_eq!(
            kinds,
            vec![OperationKind::RemoveCard, OperationKind::UpdateUserCardsCreatedCount]
        );
    }

    #[test]
    fn signed_out_session_cannot_send() {
        let mut s = session();
        assert!(s.can_send());
        s.is_online = false;
        assert!(!s.can_send());
        s.is_online = true;
        s.api_key = None;
        assert!(!s.can_send());
    }
}
