use proptest::prelude::*;

use spacesync::{
    change::LocalChange,
    core::document::{Document, EntityStore},
    entity::{BoxItem, BoxPatch, Card, CardPatch, Connection, ConnectionType, Entity},
    history::{
        engine::HistoryEngine,
        patch::{Change, Patch},
    },
    types::{EntityKey, EntityKind},
};

fn card(id: &str, x: f64, y: f64) -> Card {
    Card {
        id: id.to_string(),
        x,
        y,
        ..Card::default()
    }
}

fn connection(id: &str, start: &str, end: &str) -> Connection {
    Connection {
        id: id.to_string(),
        start_item_id: start.to_string(),
        end_item_id: end.to_string(),
        connection_type_id: "line".to_string(),
        ..Connection::default()
    }
}

fn line_type() -> ConnectionType {
    ConnectionType {
        id: "line".to_string(),
        name: "Line".to_string(),
        ..ConnectionType::default()
    }
}

fn move_card(id: &str, x: f64, y: f64) -> LocalChange {
    LocalChange::update::<Card>(
        id,
        CardPatch {
            x: Some(x),
            y: Some(y),
            ..CardPatch::default()
        },
    )
}

fn record(history: &mut HistoryEngine, doc: &mut Document, changes: &[LocalChange]) {
    history
        .apply_and_record(doc, changes)
        .into_result()
        .expect("apply");
}

#[test]
fn recording_after_undo_discards_the_redo_branch() {
    let mut doc = Document::from_entities([card("a", 0.0, 0.0).into_any()]);
    let mut history = HistoryEngine::default();

    record(&mut history, &mut doc, &[move_card("a", 1.0, 0.0)]); // A
    record(&mut history, &mut doc, &[move_card("a", 2.0, 0.0)]); // B
    record(&mut history, &mut doc, &[move_card("a", 3.0, 0.0)]); // C
    assert_eq!(history.pointer(), 3);

    history.undo(&mut doc);
    history.undo(&mut doc);
    assert_eq!(history.pointer(), 1);
    assert_eq!(doc.cards()["a"].x, 1.0);

    record(&mut history, &mut doc, &[move_card("a", 9.0, 9.0)]); // D
    assert_eq!(history.len(), 2);
    assert_eq!(history.pointer(), 2);
    let Patch::Card(Change::Updated { new, .. }) = &history.patch_sets()[1][0] else {
        panic!("expected card update");
    };
    assert_eq!(new.x, Some(9.0));
    assert!(history.redo(&mut doc).is_empty());
}

#[test]
fn drag_gesture_records_one_patch_set_without_derived_paths() {
    let mut doc = Document::from_entities([
        card("a", 0.0, 0.0).into_any(),
        card("b", 10.0, 10.0).into_any(),
        card("c", 100.0, 0.0).into_any(),
    ]);
    let mut history = HistoryEngine::default();
    record(&mut history, &mut doc, &[LocalChange::create(connection("ac", "a", "c"))]);
    let path_before = doc.connections()["ac"].path.clone();

    history.pause(&doc);
    let mut touched = Vec::new();
    for step in 1..=5 {
        let d = f64::from(step) * 10.0;
        let applied = history.apply_and_record(
            &mut doc,
            &[move_card("a", d, d), move_card("b", 10.0 + d, 10.0 + d)],
        );
        assert!(!applied.recorded);
        touched.extend(applied.touched);
    }
    assert!(history.resume(&doc, &touched));

    assert_eq!(history.len(), 2);
    let gesture = &history.patch_sets()[1];
    assert_eq!(gesture.len(), 2);
    assert!(gesture.iter().all(|p| p.action().to_string() == "cardUpdated"));
    assert!(gesture.iter().all(|p| p.key().kind == EntityKind::Card));

    let Patch::Card(Change::Updated { id, prev, new }) = &gesture[0] else {
        panic!("expected card update");
    };
    assert_eq!(id, "a");
    assert_eq!((prev.x, prev.y), (Some(0.0), Some(0.0)));
    assert_eq!((new.x, new.y), (Some(50.0), Some(50.0)));
    let Patch::Card(Change::Updated { prev, new, .. }) = &gesture[1] else {
        panic!("expected card update");
    };
    assert_eq!((prev.x, prev.y), (Some(10.0), Some(10.0)));
    assert_eq!((new.x, new.y), (Some(60.0), Some(60.0)));

    assert_ne!(doc.connections()["ac"].path, path_before);
    history.undo(&mut doc);
    assert_eq!(doc.connections()["ac"].path, path_before);
}

#[test]
fn undo_and_redo_at_the_bounds_are_no_ops() {
    let mut doc = Document::from_entities([card("a", 0.0, 0.0).into_any()]);
    let mut history = HistoryEngine::default();
    assert!(history.undo(&mut doc).is_empty());
    assert!(history.redo(&mut doc).is_empty());
    assert_eq!(history.pointer(), 0);

    record(&mut history, &mut doc, &[move_card("a", 5.0, 5.0)]);
    assert!(history.redo(&mut doc).is_empty());
    assert_eq!(history.pointer(), 1);
}

#[test]
fn box_resize_undo_refreshes_anchored_paths() {
    let mut doc = Document::from_entities([
        BoxItem {
            id: "box".into(),
            resize_width: 100.0,
            resize_height: 100.0,
            ..BoxItem::default()
        }
        .into_any(),
        card("a", 200.0, 0.0).into_any(),
    ]);
    let mut history = HistoryEngine::default();
    record(&mut history, &mut doc, &[LocalChange::create(connection("ba", "box", "a"))]);
    assert_eq!(doc.connections()["ba"].path, "m50,50 l150,-50");

    record(
        &mut history,
        &mut doc,
        &[LocalChange::update::<BoxItem>(
            "box",
            BoxPatch {
                resize_width: Some(300.0),
                ..BoxPatch::default()
            },
        )],
    );
    assert_eq!(doc.connections()["ba"].path, "m150,50 l50,-50");

    let written = history.undo(&mut doc);
    assert_eq!(doc.connections()["ba"].path, "m50,50 l150,-50");
    assert!(written
        .iter()
        .any(|w| w.key() == EntityKey::new(EntityKind::Connection, "ba")));
}

#[test]
fn replay_skips_entities_removed_by_someone_else() {
    let mut doc = Document::from_entities([
        card("a", 0.0, 0.0).into_any(),
        card("b", 0.0, 0.0).into_any(),
    ]);
    let mut history = HistoryEngine::default();
    record(
        &mut history,
        &mut doc,
        &[move_card("a", 1.0, 1.0), move_card("b", 2.0, 2.0)],
    );

    // A collaborator removed "a" without going through history.
    doc.remove::<Card>("a");
    history.undo(&mut doc);
    assert_eq!(history.pointer(), 0);
    assert_eq!(doc.cards()["b"].x, 0.0);
    assert!(!doc.cards().contains_key("a"));
}

#[test]
fn reapply_local_layers_history_over_a_fresh_copy() {
    let original = Document::from_entities([card("a", 0.0, 0.0).into_any()]);
    let mut doc = original.clone();
    let mut history = HistoryEngine::default();
    record(&mut history, &mut doc, &[move_card("a", 7.0, 7.0)]);
    record(&mut history, &mut doc, &[LocalChange::create(card("n", 1.0, 1.0))]);
    history.undo(&mut doc);

    let mut fresh = original;
    let written = history.reapply_local(&mut fresh);
    assert_eq!(written.len(), 1);
    assert_eq!(fresh.cards()["a"].x, 7.0);
    assert!(!fresh.cards().contains_key("n"));
    assert_eq!(history.pointer(), 1);
}

#[derive(Debug, Clone)]
enum Action {
    Create { x: i16, y: i16 },
    Move { pick: u8, x: i16, y: i16 },
    Rename { pick: u8, name: u8 },
    Remove { pick: u8 },
    Connect { a: u8, b: u8 },
    Disconnect { pick: u8 },
}

fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        (any::<i16>(), any::<i16>()).prop_map(|(x, y)| Action::Create { x, y }),
        (any::<u8>(), any::<i16>(), any::<i16>()).prop_map(|(pick, x, y)| Action::Move { pick, x, y }),
        (any::<u8>(), 0u8..8).prop_map(|(pick, name)| Action::Rename { pick, name }),
        any::<u8>().prop_map(|pick| Action::Remove { pick }),
        (any::<u8>(), any::<u8>()).prop_map(|(a, b)| Action::Connect { a, b }),
        any::<u8>().prop_map(|pick| Action::Disconnect { pick }),
    ]
}

fn pick(ids: &[String], at: u8) -> Option<String> {
    if ids.is_empty() {
        None
    } else {
        Some(ids[usize::from(at) % ids.len()].clone())
    }
}

fn sorted_ids<E>(table: &hashbrown::HashMap<String, E>) -> Vec<String> {
    let mut ids: Vec<String> = table.keys().cloned().collect();
    ids.sort();
    ids
}

fn to_change(doc: &Document, action: &Action, serial: usize) -> Option<LocalChange> {
    let cards = sorted_ids(doc.cards());
    match action {
        Action::Create { x, y } => Some(LocalChange::create(card(
            &format!("card-{serial}"),
            f64::from(*x),
            f64::from(*y),
        ))),
        Action::Move { pick: at, x, y } => {
            pick(&cards, *at).map(|id| move_card(&id, f64::from(*x), f64::from(*y)))
        }
        Action::Rename { pick: at, name } => pick(&cards, *at).map(|id| {
            LocalChange::update::<Card>(
                id,
                CardPatch {
                    name: Some(format!("name-{name}")),
                    ..CardPatch::default()
                },
            )
        }),
        Action::Remove { pick: at } => pick(&cards, *at).map(LocalChange::remove::<Card>),
        Action::Connect { a, b } => {
            let start = pick(&cards, *a)?;
            let end = pick(&cards, *b)?;
            Some(LocalChange::create(connection(
                &format!("conn-{serial}"),
                &start,
                &end,
            )))
        }
        Action::Disconnect { pick: at } => {
            pick(&sorted_ids(doc.connections()), *at).map(LocalChange::remove::<Connection>)
        }
    }
}

proptest! {
    #[test]
    fn undo_then_redo_restores_the_exact_state(actions in prop::collection::vec(action_strategy(), 1..60)) {
        let mut doc = Document::from_entities([line_type().into_any()]);
        let mut history = HistoryEngine::new(64);

        for (serial, action) in actions.iter().enumerate() {
            if let Some(change) = to_change(&doc, action, serial) {
                record(&mut history, &mut doc, &[change]);
            }
        }
        let final_state = doc.clone();
        let depth = history.pointer();

        while history.pointer() > 0 {
            let before = doc.clone();
            history.undo(&mut doc);
            let undone = doc.clone();
            history.redo(&mut doc);
            prop_assert_eq!(&doc, &before);
            history.undo(&mut doc);
            prop_assert_eq!(&doc, &undone);
        }
        prop_assert!(history.undo(&mut doc).is_empty());

        for _ in 0..depth {
            history.redo(&mut doc);
        }
        prop_assert_eq!(history.pointer(), depth);
        prop_assert_eq!(&doc, &final_state);
    }
}
