//! SQLite-backed durable operation queue.

use std::path::Path;

use rusqlite::{Connection, params};

use crate::op::{OP_FORMAT_VERSION, Operation, StoredOperationEnvelope};

use super::{PersistResult, QueueStore};

/// SQLite implementation of [`crate::persist::QueueStore`].
pub struct SqliteQueueStore {
    conn: Connection,
}

impl SqliteQueueStore {
    /// Opens or creates a SQLite-backed queue at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite queue.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Number of persisted operations.
    pub fn len(&self) -> PersistResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// True when nothing is persisted.
    pub fn is_empty(&self) -> PersistResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl QueueStore for SqliteQueueStore {
    fn save_queue(&mut self, ops: &[Operation]) -> PersistResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM queue", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO queue(position, operation_id, name, payload) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, op) in ops.iter().enumerate() {
                let payload = serde_json::to_vec(&StoredOperationEnvelope::new(op.clone()))?;
                stmt.execute(params![
                    position as i64,
                    op.operation_id,
                    op.kind().as_str(),
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_queue(&self) -> PersistResult<Vec<Operation>> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM queue ORDER BY position ASC")?;

        let rows = stmt.query_map([], |row| {
            let payload: Vec<u8> = row.get(0)?;
            decode_operation_payload(&payload).map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(
                    payload.len(),
                    rusqlite::types::Type::Blob,
                    Box::new(std::io::Error::other(err)),
                )
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn clear_queue(&mut self) -> PersistResult<()> {
        self.conn.execute("DELETE FROM queue", [])?;
        Ok(())
    }
}

fn decode_operation_payload(payload: &[u8]) -> Result<Operation, String> {
    if let Ok(envelope) = serde_json::from_slice::<StoredOperationEnvelope>(payload) {
        if envelope.format_version != OP_FORMAT_VERSION {
            return Err(format!(
                "unsupported operation format version: {}",
                envelope.format_version
            ));
        }
        return Ok(envelope.operation);
    }

    // Payloads written before the envelope existed hold a bare operation.
    serde_json::from_slice::<Operation>(payload)
        .map_err(|e| format!("operation payload decode failed: {e}"))
}
