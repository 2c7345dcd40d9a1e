//! Poller: fetches one block range and classifies every block in it against
//! the [`Tracker`] as unchanged, new, or reorged.
//!
//! A tracked block is **reorged** iff the fresh view differs in hash or in log
//! count. The tracker is only read here; [`commit`] advances it once the
//! consumer has acknowledged the result.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use futures::stream::{self, StreamExt};

use chainwatch_core::config::PollPolicy;
use chainwatch_core::error::WatcherError;
use chainwatch_core::tracker::Tracker;
use chainwatch_core::types::{Block, Log, LogFilter};

use crate::fetcher::ChainClient;

/// Upper bound on in-flight header requests per poll.
const MAX_CONCURRENT_HEADERS: usize = 16;

/// Classified view of one polled range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResult {
    pub from_block: u64,
    pub to_block: u64,
    /// Fresh canonical blocks with at least one log, ascending.
    pub good_blocks: Vec<Block>,
    /// Superseded tracker views, ascending, every log `removed`.
    pub reorged_blocks: Vec<Block>,
}

impl PollResult {
    /// Lowest reorged block number.
    pub fn first_reorged(&self) -> Option<u64> {
        self.reorged_blocks.first().map(|b| b.number)
    }

    pub fn is_reorged(&self, number: u64) -> bool {
        self.reorged_blocks.iter().any(|b| b.number == number)
    }
}

/// Fetches logs and headers for a range and classifies the blocks in it.
pub struct Poller<C> {
    client: C,
    filter: LogFilter,
    policy: PollPolicy,
}

impl<C: ChainClient> Poller<C> {
    pub fn new(client: C, filter: LogFilter, policy: PollPolicy) -> Self {
        Self {
            client,
            filter,
            policy,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Poll `[from, to]` and classify it against `tracker`.
    pub async fn poll(
        &self,
        tracker: &Tracker,
        from: u64,
        to: u64,
    ) -> Result<PollResult, WatcherError> {
        let (logs, (hashes, mut errors)) = match self.policy {
            PollPolicy::Thorough => {
                futures::join!(
                    self.client.filter_logs(from, to, &self.filter),
                    self.fetch_headers((from..=to).collect()),
                )
            }
            PollPolicy::Cheap => {
                let logs = match self.client.filter_logs(from, to, &self.filter).await {
                    Ok(logs) => logs,
                    Err(e) => {
                        return Err(WatcherError::Fetch {
                            from_block: from,
                            to_block: to,
                            errors: vec![format!("logs: {e}")],
                        })
                    }
                };
                let mut numbers: BTreeSet<u64> = tracker.range(from, to).map(|b| b.number).collect();
                numbers.extend(logs.iter().map(|l| l.block_number));
                let headers = self.fetch_headers(numbers.into_iter().collect()).await;
                (Ok(logs), headers)
            }
        };

        let logs = match logs {
            Ok(logs) => logs,
            Err(e) => {
                errors.insert(0, format!("logs: {e}"));
                Vec::new()
            }
        };
        if !errors.is_empty() {
            return Err(WatcherError::Fetch {
                from_block: from,
                to_block: to,
                errors,
            });
        }

        let fresh = group_logs(logs, from, to)?;
        let result = classify(tracker, fresh, &hashes, from, to)?;

        tracing::debug!(
            from,
            to,
            policy = %self.policy,
            good = result.good_blocks.len(),
            reorged = result.reorged_blocks.len(),
            "Poll complete"
        );
        Ok(result)
    }

    /// Fetch header hashes concurrently; every failure is collected.
    async fn fetch_headers(&self, numbers: Vec<u64>) -> (BTreeMap<u64, String>, Vec<String>) {
        let responses: Vec<(u64, Result<String, WatcherError>)> = stream::iter(numbers)
            .map(|n| async move { (n, self.client.header_hash(n).await) })
            .buffer_unordered(MAX_CONCURRENT_HEADERS)
            .collect()
            .await;

        let mut hashes = BTreeMap::new();
        let mut errors = Vec::new();
        for (n, res) in responses {
            match res {
                Ok(hash) => {
                    hashes.insert(n, hash);
                }
                Err(e) => errors.push(format!("header {n}: {e}")),
            }
        }
        errors.sort();
        (hashes, errors)
    }
}

/// Group fresh logs by block number.
///
/// Two logs of one block carrying different hashes means the provider is
/// inconsistent within a single call; that aborts the cycle.
fn group_logs(logs: Vec<Log>, from: u64, to: u64) -> Result<BTreeMap<u64, Block>, WatcherError> {
    let mut blocks: BTreeMap<u64, Block> = BTreeMap::new();
    for mut log in logs {
        if log.block_number < from || log.block_number > to {
            tracing::warn!(
                block = log.block_number,
                from,
                to,
                "Provider returned a log outside the requested range, ignoring"
            );
            continue;
        }
        log.removed = false;
        match blocks.entry(log.block_number) {
            Entry::Vacant(slot) => {
                slot.insert(Block::new(log.block_number, log.block_hash.clone(), vec![log]));
            }
            Entry::Occupied(mut slot) => {
                let block = slot.get_mut();
                if !block.hash.eq_ignore_ascii_case(&log.block_hash) {
                    return Err(WatcherError::InconsistentBlockHash {
                        block_number: block.number,
                        first: block.hash.clone(),
                        second: log.block_hash,
                    });
                }
                block.logs.push(log);
            }
        }
    }
    for block in blocks.values_mut() {
        block.logs.sort_by_key(|l| l.log_index);
    }
    Ok(blocks)
}

fn classify(
    tracker: &Tracker,
    mut fresh: BTreeMap<u64, Block>,
    hashes: &BTreeMap<u64, String>,
    from: u64,
    to: u64,
) -> Result<PollResult, WatcherError> {
    let mut numbers: BTreeSet<u64> = fresh.keys().copied().collect();
    numbers.extend(tracker.range(from, to).map(|b| b.number));

    let mut result = PollResult {
        from_block: from,
        to_block: to,
        ..Default::default()
    };

    for n in numbers {
        let fresh_block = fresh.remove(&n);
        let fresh_hash = match (hashes.get(&n), &fresh_block) {
            (Some(header), Some(block)) if !header.eq_ignore_ascii_case(&block.hash) => {
                // logs and header came from different forks; the next attempt settles it
                return Err(WatcherError::Rpc(format!(
                    "logs of block {n} carry hash {} but header is {header}",
                    block.hash
                )));
            }
            (Some(header), _) => header.clone(),
            (None, Some(block)) => block.hash.clone(),
            (None, None) => {
                return Err(WatcherError::Rpc(format!("no header fetched for tracked block {n}")))
            }
        };
        let fresh_count = fresh_block.as_ref().map_or(0, |b| b.logs.len());

        if let Some(tracked) = tracker.get(n) {
            let both_empty = tracked.logs.is_empty() && fresh_count == 0;
            let changed = !tracked.hash.eq_ignore_ascii_case(&fresh_hash)
                || tracked.logs.len() != fresh_count;
            if changed && !both_empty {
                tracing::warn!(
                    block = n,
                    old_hash = %tracked.hash,
                    new_hash = %fresh_hash,
                    old_logs = tracked.logs.len(),
                    new_logs = fresh_count,
                    "Reorged block detected"
                );
                result.reorged_blocks.push(tracked.clone().into_removed());
            }
        }

        if let Some(mut block) = fresh_block {
            block.hash = fresh_hash;
            result.good_blocks.push(block);
        }
    }

    Ok(result)
}

/// Advance `tracker` to the view in `result` and evict entries below
/// `retention_threshold`.
pub fn commit(tracker: &mut Tracker, result: &PollResult, retention_threshold: u64) {
    for block in &result.reorged_blocks {
        tracker.remove(block.number);
    }
    for block in &result.good_blocks {
        tracker.put(block.clone());
    }
    let evicted = tracker.evict_below(retention_threshold);
    tracing::debug!(
        retention_threshold,
        evicted,
        tracked = tracker.len(),
        "Tracker advanced"
    );
}
