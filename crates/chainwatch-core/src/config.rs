//! Watcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WatcherError;
use crate::range::RangeParams;
use crate::types::LogFilter;

/// How much the poller fetches to detect reorgs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollPolicy {
    /// Headers only for blocks with fresh logs or tracked history.
    /// May miss a reorg on a block with no logs before and after.
    #[default]
    Cheap,
    /// Headers for every block in range.
    ///
    /// Only blocks with logs are tracked, and a block with no logs before
    /// and after is never reorged, so this classifies exactly like `Cheap`.
    /// The extra headers cost RPC calls without adding detection.
    Thorough,
}

impl std::fmt::Display for PollPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cheap => write!(f, "cheap"),
            Self::Thorough => write!(f, "thorough"),
        }
    }
}

/// Configuration for one watcher instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Unique name for this watcher (used for checkpoint keys).
    pub id: String,
    /// Chain to watch (e.g. `"ethereum"`).
    pub chain: String,
    /// Lowest block ever scanned.
    pub start_block: u64,
    /// Blocks covered by one emitter cycle.
    pub scan_width: u64,
    /// How far the emitter may walk back while a reorg is unresolved.
    pub max_go_back_retries: u64,
    /// Idle sleep between cycles when no new block exists.
    pub loop_interval_secs: u64,
    pub poll_policy: PollPolicy,
    /// `tracing` filter directive (e.g. `"info"`, `"chainwatch_evm=debug"`).
    pub log_level: String,
    /// Attempts per node call before a fetch is fatal.
    pub fetch_retries: u32,
    /// Fixed delay between fetch attempts (milliseconds).
    pub fetch_retry_delay_ms: u64,
    /// Address/topic filter.
    pub filter: LogFilter,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            id: "default".into(),
            chain: "ethereum".into(),
            start_block: 0,
            scan_width: 100,
            max_go_back_retries: 5,
            loop_interval_secs: 4,
            poll_policy: PollPolicy::Cheap,
            log_level: "info".into(),
            fetch_retries: 3,
            fetch_retry_delay_ms: 500,
            filter: LogFilter::default(),
        }
    }
}

impl WatcherConfig {
    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), WatcherError> {
        if self.scan_width == 0 {
            return Err(WatcherError::Config("scan_width must be at least 1".into()));
        }
        if self.fetch_retries == 0 {
            return Err(WatcherError::Config("fetch_retries must be at least 1".into()));
        }
        if self.id.is_empty() || self.chain.is_empty() {
            return Err(WatcherError::Config("id and chain must not be empty".into()));
        }
        Ok(())
    }

    pub fn range_params(&self) -> RangeParams {
        RangeParams {
            start_block: self.start_block,
            scan_width: self.scan_width,
            max_retries: self.max_go_back_retries,
        }
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_secs)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    /// Tracker and block metadata entries below this number are evictable
    /// once a window starting at `from_block` has been acknowledged.
    pub fn retention_threshold(&self, from_block: u64) -> u64 {
        from_block.saturating_sub(self.scan_width)
    }
}
