use tempfile::TempDir;

use spacesync::{
    entity::{Card, CardPatch, EntityRef, Update},
    op::{CountDelta, Operation, OperationBody, Session},
    persist::{QueueStore, sqlite::SqliteQueueStore},
    sync::queue::OperationQueue,
    types::ManualClock,
};

fn session() -> Session {
    Session::signed_in("user", "space", "key")
}

fn ops(clock: &ManualClock) -> Vec<Operation> {
    let bodies = vec![
        OperationBody::CreateCard(Card {
            id: "c1".to_string(),
            name: "hello".to_string(),
            ..Card::default()
        }),
        OperationBody::UpdateCard(Update::with(
            "c1",
            CardPatch {
                x: Some(12.5),
                ..CardPatch::default()
            },
        )),
        OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: 1 }),
        OperationBody::RemoveCard(EntityRef {
            id: "c0".to_string(),
        }),
    ];
    bodies
        .into_iter()
        .map(|body| {
            clock.advance(5);
            Operation::new(body, &session(), clock)
        })
        .collect()
}

#[test]
fn sqlite_queue_survives_reopen_in_order() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("queue.db");
    let written = ops(&ManualClock::new(1_000));

    let mut store = SqliteQueueStore::open(&db_path).expect("open sqlite");
    store.save_queue(&written).expect("save");
    assert_eq!(store.len().expect("len"), written.len());
    drop(store);

    let reopened = SqliteQueueStore::open(&db_path).expect("reopen");
    let loaded = reopened.load_queue().expect("load");
    assert_eq!(loaded, written);
}

#[test]
fn save_replaces_the_previous_list_and_clear_empties_it() {
    let mut store = SqliteQueueStore::open_in_memory().expect("open");
    let written = ops(&ManualClock::new(0));

    store.save_queue(&written).expect("save all");
    store.save_queue(&written[2..]).expect("save tail");
    assert_eq!(store.load_queue().expect("load"), written[2..].to_vec());

    store.clear_queue().expect("clear");
    assert!(store.is_empty().expect("is_empty"));
    assert!(store.load_queue().expect("load").is_empty());
}

#[test]
fn operation_queue_restores_from_sqlite_after_restart() {
    let tmp = TempDir::new().expect("tmp");
    let db_path = tmp.path().join("queue.db");
    let written = ops(&ManualClock::new(50));

    {
        let store = SqliteQueueStore::open(&db_path).expect("open sqlite");
        let mut queue = OperationQueue::open(Box::new(store));
        for op in written.clone() {
            queue.enqueue(op);
        }
        assert_eq!(queue.len(), written.len());
    }

    let store = SqliteQueueStore::open(&db_path).expect("reopen");
    let mut queue = OperationQueue::open(Box::new(store));
    assert_eq!(queue.operations(), written.as_slice());

    let drained = queue.dequeue_all();
    assert_eq!(drained, written);

    let store = SqliteQueueStore::open(&db_path).expect("reopen again");
    assert!(store.is_empty().expect("is_empty"));
}
