use tracing::{debug, warn};

use crate::{op::Operation, persist::QueueStore};

use super::squash::squash;

/// Result of [`OperationQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended at the back.
    Appended,
    /// Folded into a pending counter operation of the same name.
    Merged,
    /// Failed validation and was dropped.
    Rejected,
}

/// Where [`OperationQueue::requeue`] reinserts operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeuePosition {
    /// Ahead of everything pending, preserving their original precedence.
    Front,
    /// After everything pending.
    Back,
}

/// Ordered, persisted list of operations waiting to be sent.
///
/// Every mutation rewrites the backing [`QueueStore`]. A failed write is
/// logged and the queue carries on in memory.
pub struct OperationQueue {
    pending: Vec<Operation>,
    store: Box<dyn QueueStore>,
}

impl OperationQueue {
    /// Opens the queue, restoring whatever `store` persisted earlier.
    pub fn open(store: Box<dyn QueueStore>) -> Self {
        let pending = match store.load_queue() {
            Ok(ops) => ops,
            Err(err) => {
                warn!(error = %err, "could not load persisted queue; starting empty");
                Vec::new()
            }
        };
        if !pending.is_empty() {
            debug!(count = pending.len(), "restored pending operations");
        }
        Self { pending, store }
    }

    /// Appends `op`, or merges it into a pending counter of the same name.
    ///
    /// Operations that address an entity with an empty id are dropped.
    pub fn enqueue(&mut self, op: Operation) -> EnqueueOutcome {
        if op.body.entity_id().is_some_and(|id| id.is_empty()) {
            warn!(name = %op.kind(), "dropping operation with empty entity id");
            return EnqueueOutcome::Rejected;
        }

        let kind = op.kind();
        let outcome = match self
            .pending
            .iter_mut()
            .find(|pending| kind.is_counter() && pending.kind() == kind)
        {
            Some(existing) => {
                existing.merge_from(op);
                EnqueueOutcome::Merged
            }
            None => {
                self.pending.push(op);
                EnqueueOutcome::Appended
            }
        };
        self.persist();
        outcome
    }

    /// Takes every pending operation, leaving the queue empty.
    pub fn dequeue_all(&mut self) -> Vec<Operation> {
        let out = std::mem::take(&mut self.pending);
        if !out.is_empty() {
            self.persist();
        }
        out
    }

    /// Puts `ops` back, in their given order, at `position`.
    pub fn requeue(&mut self, ops: Vec<Operation>, position: RequeuePosition) {
        if ops.is_empty() {
            return;
        }
        match position {
            RequeuePosition::Front => {
                let rest = std::mem::replace(&mut self.pending, ops);
                self.pending.extend(rest);
            }
            RequeuePosition::Back => self.pending.extend(ops),
        }
        self.persist();
    }

    /// Squashes the pending list in place.
    pub fn squash_in_place(&mut self) {
        let before = self.pending.len();
        self.pending = squash(std::mem::take(&mut self.pending));
        if self.pending.len() != before {
            debug!(before, after = self.pending.len(), "squashed queue");
            self.persist();
        }
    }

    /// Pending operations in order.
    pub fn operations(&self) -> &[Operation] {
        &self.pending
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn persist(&mut self) {
        let result = if self.pending.is_empty() {
            self.store.clear_queue()
        } else {
            self.store.save_queue(&self.pending)
        };
        if let Err(err) = result {
            warn!(
                error = %err,
                pending = self.pending.len(),
                "queue persistence failed; keeping operations in memory"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{CardPatch, EntityRef, Update},
        op::{CountDelta, OperationBody, OperationKind, Session},
        persist::{MemoryQueueStore, PersistError, PersistResult},
        types::ManualClock,
    };

    fn op(body: OperationBody) -> Operation {
        Operation::new(body, &Session::signed_in("u", "s", "k"), &ManualClock::new(1))
    }

    fn counter(delta: i64) -> Operation {
        op(OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta }))
    }

    struct FailingStore;

    impl QueueStore for FailingStore {
        fn save_queue(&mut self, _ops: &[Operation]) -> PersistResult<()> {
            Err(PersistError::Message("disk full".to_string()))
        }

        fn load_queue(&self) -> PersistResult<Vec<Operation>> {
            Err(PersistError::Message("unreadable".to_string()))
        }
    }

    #[test]
    fn counters_merge_at_enqueue() {
        let store = MemoryQueueStore::new();
        let mut queue = OperationQueue::open(Box::new(store.clone()));
        assert_eq!(queue.enqueue(counter(1)), EnqueueOutcome::Appended);
        assert_eq!(
            queue.enqueue(op(OperationBody::RemoveCard(EntityRef { id: "c1".into() }))),
            EnqueueOutcome::Appended
        );
        assert_eq!(queue.enqueue(counter(1)), EnqueueOutcome::Merged);
        assert_eq!(queue.enqueue(counter(-1)), EnqueueOutcome::Merged);

        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.operations()[0].body,
            OperationBody::UpdateUserCardsCreatedCount(CountDelta { delta: 1 })
        );
        assert_eq!(store.saved(), queue.operations());
    }

    #[test]
    fn empty_entity_id_is_rejected() {
        let mut queue = OperationQueue::open(Box::new(MemoryQueueStore::new()));
        let outcome = queue.enqueue(op(OperationBody::UpdateCard(Update::with(
            "",
            CardPatch::default(),
        ))));
        assert_eq!(outcome, EnqueueOutcome::Rejected);
        assert!(queue.is_empty());
    }

    #[test]
    fn requeue_front_precedes_newer_operations() {
        let mut queue = OperationQueue::open(Box::new(MemoryQueueStore::new()));
        queue.enqueue(op(OperationBody::RemoveCard(EntityRef { id: "a".into() })));
        let sent = queue.dequeue_all();
        queue.enqueue(op(OperationBody::RemoveCard(EntityRef { id: "b".into() })));
        queue.requeue(sent, RequeuePosition::Front);

        let ids: Vec<_> = queue
            .operations()
            .iter()
            .filter_map(|op| op.body.entity_id().cloned())
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn persistence_failure_keeps_operations_in_memory() {
        let mut queue = OperationQueue::open(Box::new(FailingStore));
        assert_eq!(queue.enqueue(counter(2)), EnqueueOutcome::Appended);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue_all()[0].kind(), OperationKind::UpdateUserCardsCreatedCount);
    }
}
