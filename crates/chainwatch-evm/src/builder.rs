//! Fluent builder API for watcher configs.
//!
//! # Example
//!
//! ```rust,no_run
//! use chainwatch_evm::WatcherBuilder;
//! use chainwatch_core::config::PollPolicy;
//! use chainwatch_core::types::LogFilter;
//!
//! let config = WatcherBuilder::new()
//!     .id("uniswap-pools")
//!     .start_block(12_369_621)
//!     .scan_width(200)
//!     .poll_policy(PollPolicy::Thorough)
//!     .filter(LogFilter::address("0x1F98431c8aD98523631AE4a59f267346ea31F984"))
//!     .build_config()
//!     .unwrap();
//! ```

use chainwatch_core::config::{PollPolicy, WatcherConfig};
use chainwatch_core::error::WatcherError;
use chainwatch_core::types::LogFilter;

/// Fluent builder for [`WatcherConfig`].
#[derive(Default)]
pub struct WatcherBuilder {
    config: WatcherConfig,
}

impl WatcherBuilder {
    pub fn new() -> Self {
        Self {
            config: WatcherConfig::default(),
        }
    }

    /// Set the watcher ID (used for checkpoint keys).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the chain to watch.
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.config.chain = chain.into();
        self
    }

    /// Set the lowest block ever scanned.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the number of blocks covered per cycle.
    pub fn scan_width(mut self, width: u64) -> Self {
        self.config.scan_width = width;
        self
    }

    /// Set how many times `from_block` may walk back during a reorg.
    pub fn max_go_back_retries(mut self, n: u64) -> Self {
        self.config.max_go_back_retries = n;
        self
    }

    /// Set the idle sleep between cycles in seconds.
    pub fn loop_interval_secs(mut self, secs: u64) -> Self {
        self.config.loop_interval_secs = secs;
        self
    }

    pub fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.config.poll_policy = policy;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    /// Set fetch attempts and the fixed delay between them.
    pub fn fetch_retries(mut self, attempts: u32, delay_ms: u64) -> Self {
        self.config.fetch_retries = attempts;
        self.config.fetch_retry_delay_ms = delay_ms;
        self
    }

    /// Set the address/topic filter.
    pub fn filter(mut self, filter: LogFilter) -> Self {
        self.config.filter = filter;
        self
    }

    /// Validate and return the [`WatcherConfig`].
    pub fn build_config(self) -> Result<WatcherConfig, WatcherError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
