//! chainwatch-core: foundation for the reorg-aware log watcher.
//!
//! # Architecture
//!
//! ```text
//!  Emitter task                                   Engine task
//!  ├── compute_range   (range policy)             ├── MetadataTracker (block lifecycle)
//!  ├── Poller          (fetch + classify)  ──►    ├── ServiceEngine   (business handlers)
//!  └── Tracker         (last published view) ◄──  └── CheckpointManager (persist + ack)
//! ```
//!
//! This crate holds everything that does not talk to a node; the tasks
//! themselves live in `chainwatch-evm`.

pub mod block_state;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod handler;
pub mod range;
pub mod tracker;
pub mod types;

pub use block_state::{BlockEvent, BlockMetadata, BlockState, MetadataTracker};
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use config::{PollPolicy, WatcherConfig};
pub use error::WatcherError;
pub use handler::ServiceEngine;
pub use range::{compute_range, RangeParams};
pub use tracker::Tracker;
pub use types::{Block, EmitterStatus, FilterResult, Log, LogFilter};
