//! SQLite checkpoint backend for ChainWatch.
//!
//! One row per `(chain_id, watcher_id)`; saves are upserts, so the table never
//! grows past the number of watchers.
//!
//! # Usage
//! ```rust,no_run
//! use chainwatch_storage::sqlite::SqliteCheckpointStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCheckpointStore::open("./watcher.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCheckpointStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainwatch_core::checkpoint::{Checkpoint, CheckpointStore};
use chainwatch_core::error::WatcherError;

fn storage_err(e: sqlx::Error) -> WatcherError {
    WatcherError::Storage(e.to_string())
}

/// SQLite-backed [`CheckpointStore`].
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./watcher.db"`) or a full
    /// SQLite URL (`"sqlite:./watcher.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, WatcherError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. Everything is lost when the store drops.
    pub async fn in_memory() -> Result<Self, WatcherError> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), WatcherError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                chain_id     TEXT    NOT NULL,
                watcher_id   TEXT    NOT NULL,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                PRIMARY KEY (chain_id, watcher_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Every stored checkpoint, ordered by chain then watcher.
    pub async fn list(&self) -> Result<Vec<Checkpoint>, WatcherError> {
        let rows = sqlx::query(
            "SELECT chain_id, watcher_id, block_number, updated_at
             FROM checkpoints ORDER BY chain_id, watcher_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_checkpoint).collect()
    }
}

fn row_to_checkpoint(r: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, WatcherError> {
    let raw: i64 = r.get("block_number");
    let block_number = u64::try_from(raw)
        .map_err(|_| WatcherError::Storage(format!("stored block number {raw} is negative")))?;
    Ok(Checkpoint {
        chain_id: r.get("chain_id"),
        watcher_id: r.get("watcher_id"),
        block_number,
        updated_at: r.get("updated_at"),
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(
        &self,
        chain_id: &str,
        watcher_id: &str,
    ) -> Result<Option<Checkpoint>, WatcherError> {
        let row = sqlx::query(
            "SELECT chain_id, watcher_id, block_number, updated_at
             FROM checkpoints WHERE chain_id = ? AND watcher_id = ?",
        )
        .bind(chain_id)
        .bind(watcher_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(row_to_checkpoint).transpose()
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), WatcherError> {
        let block_number = i64::try_from(checkpoint.block_number).map_err(|_| {
            WatcherError::Storage(format!(
                "block number {} does not fit in an SQLite integer",
                checkpoint.block_number
            ))
        })?;

        sqlx::query(
            "INSERT OR REPLACE INTO checkpoints
             (chain_id, watcher_id, block_number, updated_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.chain_id)
        .bind(&checkpoint.watcher_id)
        .bind(block_number)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            chain_id = %checkpoint.chain_id,
            watcher_id = %checkpoint.watcher_id,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, chain_id: &str, watcher_id: &str) -> Result<(), WatcherError> {
        sqlx::query("DELETE FROM checkpoints WHERE chain_id = ? AND watcher_id = ?")
            .bind(chain_id)
            .bind(watcher_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        debug!(chain_id, watcher_id, "checkpoint deleted");
        Ok(())
    }
}
