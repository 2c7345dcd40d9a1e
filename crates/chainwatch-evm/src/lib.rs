//! chainwatch-evm: reorg-aware log poller, emitter and engine loops.

pub mod builder;
pub mod emitter;
pub mod engine;
pub mod fetcher;
pub mod poller;
pub mod watcher;

pub use builder::WatcherBuilder;
pub use emitter::{Cycle, Emitter};
pub use engine::Engine;
pub use fetcher::{ChainClient, RawLog, RetryPolicy};
pub use poller::{PollResult, Poller};
pub use watcher::Watcher;
