//! Durable last-processed-position tracking.
//!
//! A checkpoint records the identity and timestamp of the last record a node
//! handled, keyed by the run identity and the node's path. The pipeline's
//! checkpoint ticker writes into a [`CheckpointStore`]; adaptors read back
//! from it on startup to resume where a previous run stopped.
//!
//! Two implementations are provided:
//!
//! - [`FileCheckpointStore`] persists the whole map to a single JSON file,
//!   either on every save or on a background interval ([`FlushMode`]).
//! - [`MemoryCheckpointStore`] keeps everything in memory, for tests and
//!   runs without a configured path.

pub mod error;
pub mod file;

pub use error::{CheckpointError, Result};
pub use file::{FileCheckpointStore, FlushMode};

use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Last processed position of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub timestamp: i64,
}

impl Checkpoint {
    pub fn from_message(msg: &Message) -> Self {
        Self {
            id: msg.id_as_string(),
            timestamp: msg.timestamp,
        }
    }
}

/// Outcome of a checkpoint lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A checkpoint was recorded for this key.
    Found(Checkpoint),
    /// Snapshot data exists, but nothing was ever recorded for this key.
    Missing,
    /// No snapshot exists yet (first run).
    ColdStart,
}

impl Selection {
    /// The checkpoint, if one was found.
    pub fn into_checkpoint(self) -> Option<Checkpoint> {
        match self {
            Selection::Found(cp) => Some(cp),
            Selection::Missing | Selection::ColdStart => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Selection::Found(_))
    }
}

/// Composite key under which a node's checkpoint is stored.
pub fn checkpoint_key(run_id: &str, path: &str) -> String {
    format!("{run_id}-{path}")
}

/// Storage contract for checkpoints.
///
/// Implementations must be `Send + Sync`: the pipeline's checkpoint ticker
/// and any resuming adaptor call into the same store concurrently.
pub trait CheckpointStore: Send + Sync {
    /// Upsert the checkpoint for `(run_id, path)` from `msg`'s identity and
    /// timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the store could not persist the entry.
    fn save(&self, run_id: &str, path: &str, msg: &Message) -> Result<()>;

    /// Look up the checkpoint for `(run_id, path)`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Corrupt`] if a snapshot exists but cannot
    /// be decoded, or [`CheckpointError::Io`] if it cannot be read.
    fn select(&self, run_id: &str, path: &str) -> Result<Selection>;

    /// Persist all pending entries now.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Stop background work and persist pending entries. Idempotent.
    fn shutdown(&self) {}
}

/// In-memory checkpoint store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<BTreeMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded checkpoints.
    pub fn len(&self) -> usize {
        self.states.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, run_id: &str, path: &str, msg: &Message) -> Result<()> {
        let mut states = self.states.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        states.insert(checkpoint_key(run_id, path), Checkpoint::from_message(msg));
        Ok(())
    }

    fn select(&self, run_id: &str, path: &str) -> Result<Selection> {
        let states = self.states.lock().map_err(|_| CheckpointError::LockPoisoned)?;
        if states.is_empty() {
            return Ok(Selection::ColdStart);
        }
        Ok(states
            .get(&checkpoint_key(run_id, path))
            .cloned()
            .map_or(Selection::Missing, Selection::Found))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Op;
    use serde_json::json;

    fn msg_with_id(id: &str, ts: i64) -> Message {
        let doc = json!({"_id": id, "field": 1});
        Message::new(Op::Insert, "db.coll", doc.as_object().cloned()).with_timestamp(ts)
    }

    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn CheckpointStore) {}
    }

    #[test]
    fn test_checkpoint_key_format() {
        assert_eq!(checkpoint_key("somelongkey", "somepath"), "somelongkey-somepath");
    }

    #[test]
    fn test_memory_store_cold_start() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.select("k", "p").unwrap(), Selection::ColdStart);
    }

    #[test]
    fn test_memory_store_round_trip_and_overwrite() {
        let store = MemoryCheckpointStore::new();
        store.save("k", "p", &msg_with_id("123", 10)).unwrap();
        assert_eq!(
            store.select("k", "p").unwrap(),
            Selection::Found(Checkpoint {
                id: "123".into(),
                timestamp: 10
            })
        );

        store.save("k", "p", &msg_with_id("1234", 20)).unwrap();
        let cp = store.select("k", "p").unwrap().into_checkpoint().unwrap();
        assert_eq!(cp.id, "1234");
        assert_eq!(cp.timestamp, 20);
        assert_eq!(store.len(), 1);

        assert_eq!(store.select("k", "other").unwrap(), Selection::Missing);
    }
}
