//! Block tracker: a sliding window of the last block views handed to the
//! consumer, used to classify freshly fetched blocks as unchanged or reorged.

use std::collections::BTreeMap;

use crate::types::Block;

/// Ordered window mapping block number → last known canonical [`Block`].
///
/// Only blocks that carried at least one interesting log are kept. The
/// emitter owns its tracker exclusively; there is no shared handle.
#[derive(Debug, Default)]
pub struct Tracker {
    blocks: BTreeMap<u64, Block>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tracked block at `number`, if any.
    pub fn get(&self, number: u64) -> Option<&Block> {
        self.blocks.get(&number)
    }

    /// Insert `block`, replacing any previous view at the same number.
    pub fn put(&mut self, block: Block) {
        self.blocks.insert(block.number, block);
    }

    /// Forget the block at `number`.
    pub fn remove(&mut self, number: u64) -> Option<Block> {
        self.blocks.remove(&number)
    }

    /// Drop every block with `number < threshold`, oldest first.
    ///
    /// Returns the number of evicted entries.
    pub fn evict_below(&mut self, threshold: u64) -> usize {
        let mut evicted = 0;
        while let Some(entry) = self.blocks.first_entry() {
            if *entry.key() >= threshold {
                break;
            }
            entry.remove();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(threshold, evicted, remaining = self.blocks.len(), "Evicted tracked blocks");
        }
        evicted
    }

    /// The oldest tracked block.
    pub fn oldest(&self) -> Option<&Block> {
        self.blocks.values().next()
    }

    /// The newest tracked block.
    pub fn newest(&self) -> Option<&Block> {
        self.blocks.values().next_back()
    }

    /// Tracked blocks with `from <= number <= to`, ascending.
    pub fn range(&self, from: u64, to: u64) -> impl Iterator<Item = &Block> {
        self.blocks.range(from..=to).map(|(_, b)| b)
    }

    /// Number of blocks in the window.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns `true` if the window is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
