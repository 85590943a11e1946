//! Space entities (cards, connections, connection types, boxes) and their
//! sparse patches.
//!
//! Every entity declares two field groups. *History* fields are the ones a
//! user edits and that undo/redo restores. *Derived* fields are measured or
//! recomputed by the client (dimensions, z-order, URL previews, connection
//! paths) and are skipped when diffing for history.

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    change::{AnyEntity, AnyUpdate},
    core::document::Document,
    history::patch::{Change, Patch},
    types::{EntityId, EntityKey, EntityKind},
};

/// Sparse, field-level patch over an entity.
pub trait EntityPatch:
    Clone + fmt::Debug + PartialEq + Default + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Entity type the patch applies to.
    type Target;

    /// Returns true when no fields are set.
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Patch that sets every field of `entity`.
    fn from_entity(entity: &Self::Target) -> Self;

    /// Captures the current values of `entity` for every field set in `self`.
    fn capture_inverse_for(&self, entity: &Self::Target) -> Self;

    /// Applies this patch in place to `entity`.
    fn apply_to(&self, entity: &mut Self::Target);

    /// Field-level last-write-wins: fields set in `later` overwrite, fields
    /// absent from `later` are kept.
    fn merge(&mut self, later: Self);

    /// Returns `(prev, new)` patches holding only the history fields that
    /// differ between `prev` and `next`.
    fn diff_significant(prev: &Self::Target, next: &Self::Target) -> (Self, Self);
}

/// A kind-specific entity stored in a [`Document`].
pub trait Entity:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Sparse patch type for this entity.
    type Patch: EntityPatch<Target = Self>;

    /// Kind tag.
    const KIND: EntityKind;

    /// Stable id.
    fn id(&self) -> &EntityId;

    /// Kind plus id.
    fn key(&self) -> EntityKey {
        EntityKey::new(Self::KIND, self.id().clone())
    }

    /// The document table holding entities of this kind.
    fn table(doc: &Document) -> &HashMap<EntityId, Self>;

    /// Mutable access to the document table holding entities of this kind.
    fn table_mut(doc: &mut Document) -> &mut HashMap<EntityId, Self>;

    /// Wraps into the kind-erased entity enum.
    fn into_any(self) -> AnyEntity;

    /// Unwraps from the kind-erased entity enum.
    fn from_any(any: AnyEntity) -> Option<Self>;

    /// Wraps an update into the kind-erased update enum.
    fn update_into_any(update: Update<Self::Patch>) -> AnyUpdate;

    /// Wraps a history change into the kind-erased patch enum.
    fn change_into_patch(change: Change<Self>) -> Patch;
}

/// Partial update addressed to one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update<P> {
    /// Target entity id.
    pub id: EntityId,
    /// Fields to overwrite.
    #[serde(flatten)]
    pub patch: P,
}

impl<P: Default> Update<P> {
    /// An empty update for `id`.
    pub fn new(id: impl Into<EntityId>) -> Self {
        Self {
            id: id.into(),
            patch: P::default(),
        }
    }
}

impl<P> Update<P> {
    /// An update for `id` carrying `patch`.
    pub fn with(id: impl Into<EntityId>, patch: P) -> Self {
        Self {
            id: id.into(),
            patch,
        }
    }
}

/// Body of operations that only address an entity by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Target entity id.
    pub id: EntityId,
}

macro_rules! define_entity {
    (
        $(#[$meta:meta])*
        $name:ident / $patch:ident, kind = $kind:ident, table = $table:ident {
            history {
                $( $(#[$hmeta:meta])* $hfield:ident : $hty:ty ),* $(,)?
            }
            derived {
                $( $(#[$dmeta:meta])* $dfield:ident : $dty:ty ),* $(,)?
            }
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", default)]
        pub struct $name {
            /// Stable entity id.
            pub id: EntityId,
            $( $(#[$hmeta])* pub $hfield: $hty, )*
            $( $(#[$dmeta])* pub $dfield: $dty, )*
        }

        #[doc = concat!("Sparse patch over [`", stringify!($name), "`]; each `Some` field overwrites the entity value.")]
        #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
        #[serde(rename_all = "camelCase", default)]
        pub struct $patch {
            $(
                $(#[$hmeta])*
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $hfield: Option<$hty>,
            )*
            $(
                $(#[$dmeta])*
                #[serde(skip_serializing_if = "Option::is_none")]
                pub $dfield: Option<$dty>,
            )*
        }

        impl EntityPatch for $patch {
            type Target = $name;

            fn from_entity(entity: &$name) -> Self {
                Self {
                    $( $hfield: Some(entity.$hfield.clone()), )*
                    $( $dfield: Some(entity.$dfield.clone()), )*
                }
            }

            fn capture_inverse_for(&self, entity: &$name) -> Self {
                Self {
                    $( $hfield: self.$hfield.as_ref().map(|_| entity.$hfield.clone()), )*
                    $( $dfield: self.$dfield.as_ref().map(|_| entity.$dfield.clone()), )*
                }
            }

            fn apply_to(&self, entity: &mut $name) {
                $(
                    if let Some(v) = &self.$hfield {
                        entity.$hfield = v.clone();
                    }
                )*
                $(
                    if let Some(v) = &self.$dfield {
                        entity.$dfield = v.clone();
                    }
                )*
            }

            fn merge(&mut self, later: Self) {
                $(
                    if later.$hfield.is_some() {
                        self.$hfield = later.$hfield;
                    }
                )*
                $(
                    if later.$dfield.is_some() {
                        self.$dfield = later.$dfield;
                    }
                )*
            }

            fn diff_significant(prev: &$name, next: &$name) -> (Self, Self) {
                let mut before = Self::default();
                let mut after = Self::default();
                $(
                    if prev.$hfield != next.$hfield {
                        before.$hfield = Some(prev.$hfield.clone());
                        after.$hfield = Some(next.$hfield.clone());
                    }
                )*
                (before, after)
            }
        }

        impl Entity for $name {
            type Patch = $patch;

            const KIND: EntityKind = EntityKind::$kind;

            fn id(&self) -> &EntityId {
                &self.id
            }

            fn table(doc: &Document) -> &HashMap<EntityId, Self> {
                &doc.$table
            }

            fn table_mut(doc: &mut Document) -> &mut HashMap<EntityId, Self> {
                &mut doc.$table
            }

            fn into_any(self) -> AnyEntity {
                AnyEntity::$kind(self)
            }

            fn from_any(any: AnyEntity) -> Option<Self> {
                match any {
                    AnyEntity::$kind(entity) => Some(entity),
                    _ => None,
                }
            }

            fn update_into_any(update: Update<$patch>) -> AnyUpdate {
                AnyUpdate::$kind(update)
            }

            fn change_into_patch(change: Change<Self>) -> Patch {
                Patch::$kind(change)
            }
        }
    };
}

define_entity! {
    /// A note card positioned on the canvas.
    Card / CardPatch, kind = Card, table = cards {
        history {
            /// Left edge in canvas pixels.
            x: f64,
            /// Top edge in canvas pixels.
            y: f64,
            /// Card text.
            name: String,
            /// Background color, empty for the default.
            color: String,
            /// Decorative frame id, 0 for none.
            frame_id: u32,
            /// User-chosen width, 0 when auto-sized.
            resize_width: f64,
            /// Locked cards cannot be dragged.
            is_locked: bool,
            /// Comment cards render collapsed.
            is_comment: bool,
        }
        derived {
            /// Stacking order.
            z: i64,
            /// Measured rendered width.
            width: f64,
            /// Measured rendered height.
            height: f64,
            /// Timestamp of the last name edit.
            name_updated_at: u64,
            /// URL the preview was built from.
            url_preview_url: String,
            /// Preview title.
            url_preview_title: String,
            /// Preview description.
            url_preview_description: String,
            /// Preview image URL.
            url_preview_image: String,
            /// Preview favicon URL.
            url_preview_favicon: String,
            /// Set when the preview needs a refresh.
            should_update_url_preview: bool,
            /// Card the name links to, resolved from the name.
            link_to_card_id: String,
        }
    }
}

define_entity! {
    /// A line between two cards or boxes.
    Connection / ConnectionPatch, kind = Connection, table = connections {
        history {
            /// Card or box the connection starts at.
            start_item_id: EntityId,
            /// Card or box the connection ends at.
            end_item_id: EntityId,
            /// Shared style of the line.
            connection_type_id: EntityId,
            /// Whether the type label is drawn.
            label_is_visible: bool,
            /// Whether an arrow head is drawn.
            direction_is_visible: bool,
        }
        derived {
            /// SVG path between the anchored items.
            path: String,
        }
    }
}

define_entity! {
    /// Named color shared by a group of connections.
    ConnectionType / ConnectionTypePatch, kind = ConnectionType, table = connection_types {
        history {
            /// Type name.
            name: String,
            /// Line color.
            color: String,
            /// Whether lines of this type are dashed.
            is_dashed: bool,
        }
        derived {}
    }
}

define_entity! {
    /// A resizable region that groups cards.
    BoxItem / BoxPatch, kind = Box, table = boxes {
        history {
            /// Left edge in canvas pixels.
            x: f64,
            /// Top edge in canvas pixels.
            y: f64,
            /// Width chosen by resizing.
            resize_width: f64,
            /// Height chosen by resizing.
            resize_height: f64,
            /// Box title.
            name: String,
            /// Border color.
            color: String,
            /// Fill style.
            fill: String,
            /// Locked boxes cannot be dragged.
            is_locked: bool,
        }
        derived {
            /// Measured width of the title badge.
            info_width: f64,
            /// Measured height of the title badge.
            info_height: f64,
        }
    }
}

impl Card {
    /// Point connection paths anchor to: the card center once measured.
    pub fn anchor(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

impl BoxItem {
    /// Point connection paths anchor to: the box center.
    pub fn anchor(&self) -> (f64, f64) {
        (self.x + self.resize_width / 2.0, self.y + self.resize_height / 2.0)
    }
}

impl Connection {
    /// Straight SVG path between two anchor points.
    pub fn path_between(start: (f64, f64), end: (f64, f64)) -> String {
        format!("m{},{} l{},{}", start.0, start.1, end.0 - start.0, end.1 - start.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card() -> Card {
        Card {
            id: "c1".to_string(),
            x: 10.0,
            y: 20.0,
            name: "hello".to_string(),
            width: 80.0,
            height: 40.0,
            ..Card::default()
        }
    }

    #[test]
    fn diff_ignores_derived_fields() {
        let prev = card();
        let mut next = prev.clone();
        next.width = 120.0;
        next.z = 9;
        next.name_updated_at = 77;
        let (before, after) = CardPatch::diff_significant(&prev, &next);
        assert!(before.is_empty());
        assert!(after.is_empty());

        next.x = 50.0;
        let (before, after) = CardPatch::diff_significant(&prev, &next);
        assert_eq!(before.x, Some(10.0));
        assert_eq!(after.x, Some(50.0));
        assert_eq!(after.width, None);
    }

    #[test]
    fn merge_keeps_fields_absent_from_later_patch() {
        let mut first = CardPatch {
            name: Some("a".to_string()),
            x: Some(1.0),
            ..CardPatch::default()
        };
        first.merge(CardPatch {
            name: Some("b".to_string()),
            y: Some(2.0),
            ..CardPatch::default()
        });
        assert_eq!(first.name.as_deref(), Some("b"));
        assert_eq!(first.x, Some(1.0));
        assert_eq!(first.y, Some(2.0));
    }

    #[test]
    fn inverse_restores_patched_fields() {
        let mut rec = card();
        let before = rec.clone();
        let patch = CardPatch {
            x: Some(99.0),
            color: Some("#fff".to_string()),
            ..CardPatch::default()
        };
        let inverse = patch.capture_inverse_for(&rec);
        patch.apply_to(&mut rec);
        assert_ne!(rec, before);
        inverse.apply_to(&mut rec);
        assert_eq!(rec, before);
    }

    #[test]
    fn update_wire_format_is_flat_camel_case() {
        let update = Update::with(
            "b1",
            BoxPatch {
                resize_width: Some(300.0),
                ..BoxPatch::default()
            },
        );
        let json = serde_json::to_value(&update).expect("serialize");
        assert_eq!(json, serde_json::json!({ "id": "b1", "resizeWidth": 300.0 }));
        let back: Update<BoxPatch> = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, update);
    }
}
