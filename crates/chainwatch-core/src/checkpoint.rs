//! Checkpoint manager: persists the highest block the consumer has fully
//! processed, so a restarted watcher resumes from there.
//!
//! "No checkpoint" is a distinct condition (first run) and is modelled as
//! `None`, never as block zero.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WatcherError;

/// A persisted checkpoint for a watcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Chain slug (e.g. `"ethereum"`).
    pub chain_id: String,
    /// Unique watcher identifier.
    pub watcher_id: String,
    /// Last fully processed block number.
    pub block_number: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include [`MemoryCheckpointStore`] and the SQLite store in
/// `chainwatch-storage`.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the latest checkpoint for a given chain + watcher pair.
    async fn load(
        &self,
        chain_id: &str,
        watcher_id: &str,
    ) -> Result<Option<Checkpoint>, WatcherError>;

    /// Save (upsert) a checkpoint.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), WatcherError>;

    /// Delete a checkpoint (e.g. when resetting a watcher).
    async fn delete(&self, chain_id: &str, watcher_id: &str) -> Result<(), WatcherError>;
}

/// Checkpoint access scoped to one chain + watcher pair.
///
/// Cheap to clone; the emitter reads through one clone while the engine
/// writes through another.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    chain_id: String,
    watcher_id: String,
}

impl CheckpointManager {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        chain_id: impl Into<String>,
        watcher_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            chain_id: chain_id.into(),
            watcher_id: watcher_id.into(),
        }
    }

    /// The last persisted block, or `None` if this watcher never saved one.
    pub async fn get_checkpoint(&self) -> Result<Option<u64>, WatcherError> {
        Ok(self
            .store
            .load(&self.chain_id, &self.watcher_id)
            .await?
            .map(|cp| cp.block_number))
    }

    /// Persist `block_number` as the new checkpoint.
    pub async fn set_checkpoint(&self, block_number: u64) -> Result<(), WatcherError> {
        let cp = Checkpoint {
            chain_id: self.chain_id.clone(),
            watcher_id: self.watcher_id.clone(),
            block_number,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(cp).await
    }

    /// Forget the checkpoint; the next run is a first run again.
    pub async fn reset(&self) -> Result<(), WatcherError> {
        self.store.delete(&self.chain_id, &self.watcher_id).await
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("chain_id", &self.chain_id)
            .field("watcher_id", &self.watcher_id)
            .finish()
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral watchers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(chain_id: &str, watcher_id: &str) -> String {
        format!("{chain_id}:{watcher_id}")
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, WatcherError> {
        self.data
            .lock()
            .map_err(|e| WatcherError::Storage(format!("checkpoint map poisoned: {e}")))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(
        &self,
        chain_id: &str,
        watcher_id: &str,
    ) -> Result<Option<Checkpoint>, WatcherError> {
        Ok(self.lock()?.get(&Self::key(chain_id, watcher_id)).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), WatcherError> {
        let key = Self::key(&checkpoint.chain_id, &checkpoint.watcher_id);
        self.lock()?.insert(key, checkpoint);
        Ok(())
    }

    async fn delete(&self, chain_id: &str, watcher_id: &str) -> Result<(), WatcherError> {
        self.lock()?.remove(&Self::key(chain_id, watcher_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn not_found_is_distinct_from_zero() {
        let mgr = CheckpointManager::new(Arc::new(MemoryCheckpointStore::new()), "ethereum", "w");
        assert_eq!(mgr.get_checkpoint().await.unwrap(), None);

        mgr.set_checkpoint(0).await.unwrap();
        assert_eq!(mgr.get_checkpoint().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn managers_share_one_store() {
        let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
        let writer = CheckpointManager::new(store.clone(), "ethereum", "w");
        let reader = writer.clone();
        let other = CheckpointManager::new(store, "ethereum", "other");

        writer.set_checkpoint(1000).await.unwrap();
        assert_eq!(reader.get_checkpoint().await.unwrap(), Some(1000));
        assert_eq!(other.get_checkpoint().await.unwrap(), None);

        writer.reset().await.unwrap();
        assert_eq!(reader.get_checkpoint().await.unwrap(), None);
    }
}
