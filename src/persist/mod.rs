/// SQLite implementation of [`QueueStore`].
pub mod sqlite;

use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::op::Operation;

/// Failure reading or writing the durable queue.
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encoding failure.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// Anything else.
    #[error("{0}")]
    Message(String),
}

/// Result alias for persistence calls.
pub type PersistResult<T> = Result<T, PersistError>;

/// Durable local storage for the pending operation queue.
///
/// The queue is rewritten wholesale after every mutation, so implementations
/// only need whole-list save and load.
pub trait QueueStore: Send {
    /// Replaces the persisted queue with `ops`.
    fn save_queue(&mut self, ops: &[Operation]) -> PersistResult<()>;
    /// Loads the persisted queue in order.
    fn load_queue(&self) -> PersistResult<Vec<Operation>>;
    /// Removes every persisted operation.
    fn clear_queue(&mut self) -> PersistResult<()> {
        self.save_queue(&[])
    }
}

/// Queue storage that lives only as long as the process.
///
/// Clones share the same backing list, which lets tests inspect what the
/// queue persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    saved: Arc<Mutex<Vec<Operation>>>,
}

impl MemoryQueueStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `ops`, as if saved by an earlier session.
    pub fn with_operations(ops: Vec<Operation>) -> Self {
        Self {
            saved: Arc::new(Mutex::new(ops)),
        }
    }

    /// Copy of the currently persisted list.
    pub fn saved(&self) -> Vec<Operation> {
        self.saved.lock().map(|ops| ops.clone()).unwrap_or_default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn save_queue(&mut self, ops: &[Operation]) -> PersistResult<()> {
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| PersistError::Message("memory queue lock poisoned".to_string()))?;
        *saved = ops.to_vec();
        Ok(())
    }

    fn load_queue(&self) -> PersistResult<Vec<Operation>> {
        let saved = self
            .saved
            .lock()
            .map_err(|_| PersistError::Message("memory queue lock poisoned".to_string()))?;
        Ok(saved.clone())
    }
}
