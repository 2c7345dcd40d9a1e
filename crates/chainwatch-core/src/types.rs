//! Shared types for the watcher pipeline.

use serde::{Deserialize, Serialize};

// ─── Log ──────────────────────────────────────────────────────────────────────

/// One event log emitted by a watched contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    /// Block number the log was included in.
    pub block_number: u64,
    /// Hash of the including block (`0x…`).
    pub block_hash: String,
    /// Transaction hash (`0x…`).
    pub tx_hash: String,
    /// Contract address that emitted the log.
    pub address: String,
    /// Indexed topics; `topics[0]` is the event signature hash.
    pub topics: Vec<String>,
    /// Opaque ABI-encoded payload (`0x…`).
    pub data: String,
    /// Position of the log within its block.
    pub log_index: u32,
    /// Set by the reorg classifier when the including block was superseded.
    pub removed: bool,
}

// ─── Block ────────────────────────────────────────────────────────────────────

/// The interesting logs observed for one block number at last fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Logs matching the watcher's filter, in `log_index` order.
    pub logs: Vec<Log>,
}

impl Block {
    pub fn new(number: u64, hash: impl Into<String>, logs: Vec<Log>) -> Self {
        Self {
            number,
            hash: hash.into(),
            logs,
        }
    }

    /// Returns a copy of this block with every log flagged `removed`.
    pub fn into_removed(mut self) -> Self {
        for log in &mut self.logs {
            log.removed = true;
        }
        self
    }
}

// ─── LogFilter ────────────────────────────────────────────────────────────────

/// The address/topic set a single watcher follows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only watch logs from these contract addresses (empty = all addresses).
    pub addresses: Vec<String>,
    /// Only watch logs whose topic[0] is one of these (empty = all events).
    pub topics: Vec<String>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    /// Returns `true` if `address` matches this filter.
    pub fn matches_address(&self, address: &str) -> bool {
        self.addresses.is_empty()
            || self.addresses.iter().any(|a| a.eq_ignore_ascii_case(address))
    }

    /// Returns `true` if `topic0` matches this filter.
    pub fn matches_topic(&self, topic0: &str) -> bool {
        self.topics.is_empty() || self.topics.iter().any(|t| t.eq_ignore_ascii_case(topic0))
    }

    /// Returns `true` if the log passes both the address and topic filter.
    pub fn matches(&self, log: &Log) -> bool {
        self.matches_address(&log.address)
            && log.topics.first().map_or(self.topics.is_empty(), |t| self.matches_topic(t))
    }
}

// ─── FilterResult ─────────────────────────────────────────────────────────────

/// One window of blocks handed from the emitter to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterResult {
    /// First block of the scanned range (inclusive).
    pub from_block: u64,
    /// Last block of the scanned range (inclusive).
    pub to_block: u64,
    /// Highest block the consumer may persist as its checkpoint.
    pub last_good_block: u64,
    /// Fresh canonical view of blocks with interesting logs.
    pub good_blocks: Vec<Block>,
    /// Pre-reorg view of blocks invalidated this cycle; every log is `removed`.
    pub reorged_blocks: Vec<Block>,
}

// ─── EmitterStatus ────────────────────────────────────────────────────────────

/// State carried between two range computations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterStatus {
    pub from_block: u64,
    pub to_block: u64,
    pub current_height: u64,
    /// Last persisted checkpoint; `None` until the consumer saved one.
    pub last_checkpoint: Option<u64>,
    pub is_first_run: bool,
    pub is_reorging: bool,
    pub retries_count: u64,
}

impl EmitterStatus {
    /// Status of a freshly started emitter.
    ///
    /// The retry counter starts at one so the first cycle looks back a full
    /// scan width behind the checkpoint.
    pub fn first_run() -> Self {
        Self {
            from_block: 0,
            to_block: 0,
            current_height: 0,
            last_checkpoint: None,
            is_first_run: true,
            is_reorging: false,
            retries_count: 1,
        }
    }

    /// Mark the current range as published; the next cycle is a normal one.
    pub fn settle(&mut self) {
        self.is_first_run = false;
        self.is_reorging = false;
        self.retries_count = 0;
    }

    /// The block at `from_block` was reorged: walk back on the next cycle.
    pub fn go_back(&mut self) {
        self.is_reorging = true;
        self.retries_count += 1;
    }
}

impl Default for EmitterStatus {
    fn default() -> Self {
        Self::first_run()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
