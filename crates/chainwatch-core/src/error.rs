//! Error types for the chainwatch pipeline.

use thiserror::Error;

/// Errors that can occur while watching a chain.
#[derive(Debug, Clone, Error)]
pub enum WatcherError {
    /// A single node call failed; retried by the fetcher.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// One or more concurrent sub-fetches of a poll failed.
    #[error("Fetch failed for range {from_block}..={to_block}: {}", .errors.join("; "))]
    Fetch {
        from_block: u64,
        to_block: u64,
        errors: Vec<String>,
    },

    #[error("Fetch gave up after {attempts} attempts: {last}")]
    FetchExhausted { attempts: u32, last: String },

    #[error(
        "Max go-back retries reached ({retries}) while resolving reorg, last range {from_block}..={to_block}"
    )]
    MaxRetriesReached {
        from_block: u64,
        to_block: u64,
        retries: u64,
    },

    #[error("Provider returned block {block_number} with two hashes in one fetch: {first} and {second}")]
    InconsistentBlockHash {
        block_number: u64,
        first: String,
        second: String,
    },

    #[error("Invalid state transition for block {block_number} ({block_hash}): {state} on {event}")]
    InvalidTransition {
        block_number: u64,
        block_hash: String,
        state: String,
        event: String,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("Watcher aborted: {reason}")]
    Aborted { reason: String },

    #[error("{0}")]
    Other(String),
}

impl WatcherError {
    /// Returns `true` if the error is worth retrying locally.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc(_) | Self::Fetch { .. })
    }

    /// Returns `true` if the watcher must stop on this error.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}
