//! The emitter loop: turns range computation and polling into a stream of
//! [`FilterResult`]s, one window in flight at a time.
//!
//! # Cycle
//! 1. Read chain height and the consumer's checkpoint.
//! 2. Nothing new and not reorging → idle for `loop_interval`.
//! 3. [`compute_range`], then poll with bounded retry.
//! 4. `from_block` itself reorged → walk back and retry without publishing.
//! 5. Otherwise derive `last_good_block`, publish, wait for the ack, and only
//!    then advance the tracker.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chainwatch_core::checkpoint::CheckpointManager;
use chainwatch_core::config::WatcherConfig;
use chainwatch_core::error::WatcherError;
use chainwatch_core::range::compute_range;
use chainwatch_core::tracker::Tracker;
use chainwatch_core::types::{Block, EmitterStatus, FilterResult};

use crate::fetcher::{ChainClient, RetryPolicy};
use crate::poller::{self, PollResult, Poller};

/// Outcome of one emitter cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// No block beyond the checkpoint yet.
    Idle,
    /// `from_block` was reorged; the next cycle scans further back.
    GoBack { from_block: u64, retries: u64 },
    /// A result was published and acknowledged.
    Published { from_block: u64, to_block: u64, last_good_block: u64 },
}

/// Producer side of the watcher. Owns the [`Tracker`] exclusively.
pub struct Emitter<C> {
    config: WatcherConfig,
    poller: Poller<C>,
    checkpoint: CheckpointManager,
    retry: RetryPolicy,
    tracker: Tracker,
    status: EmitterStatus,
    results: mpsc::Sender<FilterResult>,
    errors: mpsc::Sender<WatcherError>,
    ack: mpsc::Receiver<()>,
}

impl<C: ChainClient> Emitter<C> {
    pub fn new(
        config: WatcherConfig,
        client: C,
        checkpoint: CheckpointManager,
        results: mpsc::Sender<FilterResult>,
        errors: mpsc::Sender<WatcherError>,
        ack: mpsc::Receiver<()>,
    ) -> Self {
        let poller = Poller::new(client, config.filter.clone(), config.poll_policy);
        let retry = RetryPolicy::new(config.fetch_retries, config.fetch_retry_delay());
        Self {
            poller,
            checkpoint,
            retry,
            tracker: Tracker::new(),
            status: EmitterStatus::first_run(),
            results,
            errors,
            ack,
            config,
        }
    }

    pub fn status(&self) -> &EmitterStatus {
        &self.status
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Run cycles until cancelled or a fatal error occurs.
    ///
    /// Fatal errors are forwarded on the `errors` channel before being
    /// returned. Returning drops both senders, which the engine sees as
    /// end-of-stream.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WatcherError> {
        tracing::info!(
            watcher = %self.config.id,
            chain = %self.config.chain,
            start_block = self.config.start_block,
            scan_width = self.config.scan_width,
            policy = %self.config.poll_policy,
            "Emitter started"
        );

        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                outcome = self.tick() => outcome,
            };

            match outcome {
                Ok(Cycle::Idle) => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.loop_interval()) => {}
                    }
                }
                Ok(Cycle::GoBack { .. }) | Ok(Cycle::Published { .. }) => {}
                Err(e) => {
                    tracing::error!(error = %e, status = ?self.status, "Emitter stopped on fatal error");
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = self.errors.send(e.clone()) => {}
                    }
                    return Err(e);
                }
            }
        }

        tracing::info!(watcher = %self.config.id, "Emitter cancelled");
        Ok(())
    }

    /// Run exactly one cycle.
    pub async fn tick(&mut self) -> Result<Cycle, WatcherError> {
        let client = self.poller.client();
        let height = self.retry.run("current height", move || client.current_height()).await?;
        let checkpoint = self.checkpoint.get_checkpoint().await?;
        self.status.current_height = height;
        self.status.last_checkpoint = checkpoint;

        if !self.status.is_reorging && !has_new_block(height, checkpoint, self.config.start_block) {
            tracing::debug!(height, ?checkpoint, "No new block, idling");
            return Ok(Cycle::Idle);
        }

        let (from, to) = compute_range(&self.status, height, checkpoint, &self.config.range_params())?;
        self.status.from_block = from;
        self.status.to_block = to;

        let poller = &self.poller;
        let tracker = &self.tracker;
        let result = self
            .retry
            .run("poll", move || poller.poll(tracker, from, to))
            .await?;

        if from > self.config.start_block && result.is_reorged(from) {
            self.status.go_back();
            tracing::warn!(
                from,
                to,
                retries = self.status.retries_count,
                "Block at from_block was reorged, going back"
            );
            return Ok(Cycle::GoBack {
                from_block: from,
                retries: self.status.retries_count,
            });
        }

        let last_good = last_good_block(from, to, &result.good_blocks, &result.reorged_blocks);
        self.publish(&result, last_good).await?;

        poller::commit(
            &mut self.tracker,
            &result,
            self.config.retention_threshold(from),
        );
        self.status.settle();

        Ok(Cycle::Published {
            from_block: from,
            to_block: to,
            last_good_block: last_good,
        })
    }

    /// Hand `result` to the engine and wait for its acknowledgement.
    async fn publish(&mut self, result: &PollResult, last_good_block: u64) -> Result<(), WatcherError> {
        let filter_result = FilterResult {
            from_block: result.from_block,
            to_block: result.to_block,
            last_good_block,
            good_blocks: result.good_blocks.clone(),
            reorged_blocks: result.reorged_blocks.clone(),
        };

        tracing::info!(
            from = result.from_block,
            to = result.to_block,
            last_good_block,
            good = result.good_blocks.len(),
            reorged = result.reorged_blocks.len(),
            "Publishing filter result"
        );

        self.results.send(filter_result).await.map_err(|_| WatcherError::Aborted {
            reason: "engine stopped receiving results".into(),
        })?;
        self.ack.recv().await.ok_or_else(|| WatcherError::Aborted {
            reason: "engine dropped the ack channel".into(),
        })
    }
}

/// Returns `true` if a block beyond the checkpoint exists.
fn has_new_block(height: u64, checkpoint: Option<u64>, start_block: u64) -> bool {
    match checkpoint {
        Some(cp) => height > cp,
        None => height >= start_block,
    }
}

/// Highest block the consumer may checkpoint after this window.
///
/// - nothing reorged → `to`
/// - good blocks precede the first reorged one → stop right before it
/// - otherwise → `from - 1`, forcing the whole window to be re-scanned
pub fn last_good_block(from: u64, to: u64, good: &[Block], reorged: &[Block]) -> u64 {
    let Some(first_reorged) = reorged.iter().map(|b| b.number).min() else {
        return to;
    };
    let has_good_before = good.iter().any(|b| b.number < first_reorged);
    match good.iter().map(|b| b.number).max() {
        Some(last_good) if has_good_before => last_good.min(first_reorged - 1),
        _ => from.saturating_sub(1),
    }
}
