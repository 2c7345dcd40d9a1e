//! Consumer-side block lifecycle.
//!
//! Every `(number, hash)` the engine sees gets a [`BlockMetadata`] whose
//! [`BlockState`] decides whether a business handler runs. Handlers only run
//! on the transition *into* `Seen` (good logs) or `Reorged` (reverted logs),
//! so re-delivered windows never dispatch twice.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::WatcherError;

/// Lifecycle state of one observed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BlockState {
    #[default]
    Null,
    Seen,
    Handled,
    Reorged,
    HandledReorg,
}

/// Something the engine observed or completed for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockEvent {
    SawGoodBlock,
    HandledOk,
    SawReorg,
    HandledReorgOk,
}

/// A `(state, event)` pair with no defined successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub state: BlockState,
    pub event: BlockEvent,
}

impl BlockState {
    /// Apply `event` and return the next state.
    pub fn fire(self, event: BlockEvent) -> Result<Self, InvalidTransition> {
        use BlockEvent::*;
        use BlockState::*;

        match (self, event) {
            (Null, SawGoodBlock) => Ok(Seen),
            (Seen, SawGoodBlock) => Ok(Seen),
            (Seen, HandledOk) => Ok(Handled),
            // overlapping windows re-deliver unchanged blocks
            (Handled, SawGoodBlock) => Ok(Handled),
            (Seen | Handled, SawReorg) => Ok(Reorged),
            (Reorged, HandledReorgOk) => Ok(HandledReorg),
            (HandledReorg, SawReorg) => Ok(HandledReorg),
            // the chain flipped back to this hash
            (HandledReorg, SawGoodBlock) => Ok(Seen),
            (Null, HandledOk | SawReorg | HandledReorgOk)
            | (Seen, HandledReorgOk)
            | (Handled, HandledOk | HandledReorgOk)
            | (Reorged, SawGoodBlock | HandledOk | SawReorg)
            | (HandledReorg, HandledOk | HandledReorgOk) => {
                Err(InvalidTransition { state: self, event })
            }
        }
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Seen => write!(f, "seen"),
            Self::Handled => write!(f, "handled"),
            Self::Reorged => write!(f, "reorged"),
            Self::HandledReorg => write!(f, "handled-reorg"),
        }
    }
}

impl fmt::Display for BlockEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SawGoodBlock => write!(f, "saw-good-block"),
            Self::HandledOk => write!(f, "handled-ok"),
            Self::SawReorg => write!(f, "saw-reorg"),
            Self::HandledReorgOk => write!(f, "handled-reorg-ok"),
        }
    }
}

/// Lifecycle record for one `(number, hash)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockMetadata<A> {
    pub block_number: u64,
    pub block_hash: String,
    pub state: BlockState,
    /// Output of the last handler run for this block.
    pub artifacts: Option<A>,
}

impl<A> BlockMetadata<A> {
    pub fn new(block_number: u64, block_hash: impl Into<String>) -> Self {
        Self {
            block_number,
            block_hash: block_hash.into(),
            state: BlockState::Null,
            artifacts: None,
        }
    }

    /// Fire `event`, mapping an invalid pair into a fatal [`WatcherError`].
    pub fn fire(&mut self, event: BlockEvent) -> Result<BlockState, WatcherError> {
        self.state = self.state.fire(event).map_err(|e| WatcherError::InvalidTransition {
            block_number: self.block_number,
            block_hash: self.block_hash.clone(),
            state: e.state.to_string(),
            event: e.event.to_string(),
        })?;
        Ok(self.state)
    }
}

/// All block metadata owned by one engine, keyed by `(number, hash)`.
#[derive(Debug)]
pub struct MetadataTracker<A> {
    blocks: BTreeMap<(u64, String), BlockMetadata<A>>,
}

impl<A> MetadataTracker<A> {
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
        }
    }

    /// Returns the record for `(number, hash)`, creating a `Null` one if absent.
    pub fn entry(&mut self, number: u64, hash: &str) -> &mut BlockMetadata<A> {
        self.blocks
            .entry((number, hash.to_string()))
            .or_insert_with(|| BlockMetadata::new(number, hash))
    }

    pub fn get(&self, number: u64, hash: &str) -> Option<&BlockMetadata<A>> {
        self.blocks.get(&(number, hash.to_string()))
    }

    /// Drop every record with `number < threshold`.
    pub fn evict_below(&mut self, threshold: u64) -> usize {
        let kept = self.blocks.split_off(&(threshold, String::new()));
        let evicted = self.blocks.len();
        self.blocks = kept;
        tracing::trace!(threshold, evicted, "Evicted block metadata");
        evicted
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl<A> Default for MetadataTracker<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BlockEvent::*;
    use BlockState::*;

    #[test]
    fn happy_path() {
        let s = Null.fire(SawGoodBlock).unwrap();
        assert_eq!(s, Seen);
        let s = s.fire(HandledOk).unwrap();
        assert_eq!(s, Handled);
        let s = s.fire(SawReorg).unwrap();
        assert_eq!(s, Reorged);
        assert_eq!(s.fire(HandledReorgOk).unwrap(), HandledReorg);
    }

    #[test]
    fn redelivery_is_idempotent() {
        assert_eq!(Seen.fire(SawGoodBlock).unwrap(), Seen);
        assert_eq!(Handled.fire(SawGoodBlock).unwrap(), Handled);
        assert_eq!(HandledReorg.fire(SawReorg).unwrap(), HandledReorg);
    }

    #[test]
    fn reorg_before_handled_is_allowed() {
        assert_eq!(Seen.fire(SawReorg).unwrap(), Reorged);
    }

    #[test]
    fn invalid_pairs_are_rejected() {
        let invalid = [
            (Null, SawReorg),
            (Null, HandledOk),
            (Null, HandledReorgOk),
            (Seen, HandledReorgOk),
            (Handled, HandledOk),
            (Reorged, SawGoodBlock),
            (Reorged, SawReorg),
            (Reorged, HandledOk),
            (HandledReorg, HandledOk),
        ];
        for (state, event) in invalid {
            let err = state.fire(event).unwrap_err();
            assert_eq!(err, InvalidTransition { state, event });
        }
    }

    #[test]
    fn metadata_fire_reports_block() {
        let mut meta: BlockMetadata<()> = BlockMetadata::new(105, "0xdead");
        let err = meta.fire(SawReorg).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("105"));
        assert!(msg.contains("saw-reorg"));
        assert_eq!(meta.state, Null);
    }

    #[test]
    fn tracker_keys_by_number_and_hash() {
        let mut t: MetadataTracker<u32> = MetadataTracker::new();
        t.entry(105, "0xold").fire(SawGoodBlock).unwrap();
        t.entry(105, "0xnew");
        assert_eq!(t.len(), 2);
        assert_eq!(t.get(105, "0xold").unwrap().state, Seen);
        assert_eq!(t.get(105, "0xnew").unwrap().state, Null);
    }

    #[test]
    fn tracker_eviction() {
        let mut t: MetadataTracker<u32> = MetadataTracker::new();
        for n in 90..110 {
            t.entry(n, "0xa");
            t.entry(n, "0xb");
        }
        assert_eq!(t.evict_below(100), 20);
        assert_eq!(t.len(), 20);
        assert!(t.get(99, "0xb").is_none());
        assert!(t.get(100, "0xa").is_some());
    }
}
