//! Runtime event stream payloads.

use crate::{op::Operation, sync::notify::Notification, types::EntityKey};

/// Events emitted from the single-writer runtime loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// An entity was written locally, remotely, or by replay.
    Changed {
        /// Written entity.
        key: EntityKey,
    },
    /// A local operation was queued; collaborators may mirror it.
    LocalOperation(Operation),
    /// One undo step was applied.
    UndoApplied,
    /// One redo step was applied.
    RedoApplied,
    /// The space contents were replaced by a loaded copy.
    SpaceLoaded,
    /// A batch left for the server.
    SendStarted {
        /// Operations in the batch.
        count: usize,
    },
    /// A batch was reconciled.
    SendCompleted {
        /// Operations the server applied.
        delivered: usize,
        /// Operations put back in the queue.
        requeued: usize,
        /// Operations parked as rejected.
        rejected: usize,
    },
    /// A banner was shown.
    Notified(Notification),
}
