//! The engine loop: consumes [`FilterResult`]s, drives the per-block state
//! machine, dispatches to the [`ServiceEngine`], persists the checkpoint, and
//! acknowledges the emitter.
//!
//! The ack is only sent after the checkpoint is durable; a persistence
//! failure ends the engine without acknowledging.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chainwatch_core::block_state::{BlockEvent, BlockState, MetadataTracker};
use chainwatch_core::checkpoint::CheckpointManager;
use chainwatch_core::config::WatcherConfig;
use chainwatch_core::error::WatcherError;
use chainwatch_core::handler::ServiceEngine;
use chainwatch_core::types::FilterResult;

/// Consumer side of the watcher. Owns the block metadata exclusively.
pub struct Engine<S: ServiceEngine> {
    config: WatcherConfig,
    service: S,
    checkpoint: CheckpointManager,
    metadata: MetadataTracker<S::Artifacts>,
    results: mpsc::Receiver<FilterResult>,
    errors: mpsc::Receiver<WatcherError>,
    ack: mpsc::Sender<()>,
}

impl<S: ServiceEngine> Engine<S> {
    pub fn new(
        config: WatcherConfig,
        service: S,
        checkpoint: CheckpointManager,
        results: mpsc::Receiver<FilterResult>,
        errors: mpsc::Receiver<WatcherError>,
        ack: mpsc::Sender<()>,
    ) -> Self {
        Self {
            config,
            service,
            checkpoint,
            metadata: MetadataTracker::new(),
            results,
            errors,
            ack,
        }
    }

    pub fn metadata(&self) -> &MetadataTracker<S::Artifacts> {
        &self.metadata
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Consume results until the emitter closes its channels, cancellation,
    /// or a fatal error.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), WatcherError> {
        tracing::info!(watcher = %self.config.id, "Engine started");

        loop {
            tokio::select! {
                biased;

                Some(err) = self.errors.recv() => {
                    tracing::error!(error = %err, "Emitter reported a fatal error");
                    self.service.handle_emitter_fatal_error(err).await?;
                }
                maybe = self.results.recv() => {
                    let Some(result) = maybe else {
                        tracing::info!(watcher = %self.config.id, "Emitter closed the result stream");
                        return Ok(());
                    };
                    self.handle_result(&result).await?;
                    if self.ack.send(()).await.is_err() {
                        if cancel.is_cancelled() {
                            return Ok(());
                        }
                        return Err(WatcherError::Aborted {
                            reason: "emitter dropped the ack channel".into(),
                        });
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!(watcher = %self.config.id, "Engine cancelled");
                    return Ok(());
                }
            }
        }
    }

    /// Process one window: reorgs first, then good blocks, then evict and
    /// persist `last_good_block`. Does not ack.
    pub async fn handle_result(&mut self, result: &FilterResult) -> Result<(), WatcherError> {
        for block in &result.reorged_blocks {
            let meta = self.metadata.entry(block.number, &block.hash);
            if meta.fire(BlockEvent::SawReorg)? != BlockState::Reorged {
                continue;
            }
            tracing::info!(block = block.number, hash = %block.hash, logs = block.logs.len(), "Reverting reorged block");
            let artifacts = self
                .service
                .handle_reorged_logs(&block.logs, meta.artifacts.as_ref())
                .await?;
            meta.artifacts = Some(artifacts);
            meta.fire(BlockEvent::HandledReorgOk)?;
        }

        for block in &result.good_blocks {
            let meta = self.metadata.entry(block.number, &block.hash);
            if meta.fire(BlockEvent::SawGoodBlock)? != BlockState::Seen {
                continue;
            }
            tracing::debug!(block = block.number, hash = %block.hash, logs = block.logs.len(), "Handling block");
            let artifacts = self
                .service
                .handle_good_logs(&block.logs, meta.artifacts.as_ref())
                .await?;
            meta.artifacts = Some(artifacts);
            meta.fire(BlockEvent::HandledOk)?;
        }

        let evicted = self
            .metadata
            .evict_below(self.config.retention_threshold(result.from_block));

        self.checkpoint.set_checkpoint(result.last_good_block).await?;

        tracing::info!(
            from = result.from_block,
            to = result.to_block,
            checkpoint = result.last_good_block,
            evicted,
            "Window processed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    use chainwatch_core::checkpoint::{Checkpoint, CheckpointStore, MemoryCheckpointStore};
    use chainwatch_core::types::{Block, Log};

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(&'static str, u64, Option<u32>)>>,
        fail_at: Option<u64>,
    }

    #[async_trait]
    impl ServiceEngine for Recorder {
        type Artifacts = u32;

        async fn handle_good_logs(
            &self,
            logs: &[Log],
            prior: Option<&u32>,
        ) -> Result<u32, WatcherError> {
            let number = logs[0].block_number;
            self.calls.lock().unwrap().push(("good", number, prior.copied()));
            if self.fail_at == Some(number) {
                return Err(WatcherError::Handler(format!("cannot index block {number}")));
            }
            Ok(logs.len() as u32)
        }

        async fn handle_reorged_logs(
            &self,
            logs: &[Log],
            prior: Option<&u32>,
        ) -> Result<u32, WatcherError> {
            assert!(logs.iter().all(|l| l.removed));
            self.calls.lock().unwrap().push(("reorg", logs[0].block_number, prior.copied()));
            Ok(0)
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CheckpointStore for FailingStore {
        async fn load(&self, _: &str, _: &str) -> Result<Option<Checkpoint>, WatcherError> {
            Ok(None)
        }
        async fn save(&self, _: Checkpoint) -> Result<(), WatcherError> {
            Err(WatcherError::Storage("disk full".into()))
        }
        async fn delete(&self, _: &str, _: &str) -> Result<(), WatcherError> {
            Ok(())
        }
    }

    fn block(number: u64, hash: &str, logs: u32) -> Block {
        let logs = (0..logs)
            .map(|i| Log {
                block_number: number,
                block_hash: hash.into(),
                tx_hash: "0xtx".into(),
                address: "0xpool".into(),
                topics: vec![],
                data: "0x".into(),
                log_index: i,
                removed: false,
            })
            .collect();
        Block::new(number, hash, logs)
    }

    fn result(from: u64, to: u64, last_good: u64, good: Vec<Block>, reorged: Vec<Block>) -> FilterResult {
        FilterResult {
            from_block: from,
            to_block: to,
            last_good_block: last_good,
            good_blocks: good,
            reorged_blocks: reorged.into_iter().map(Block::into_removed).collect(),
        }
    }

    struct Harness {
        engine: Engine<Recorder>,
        checkpoint: CheckpointManager,
        results: mpsc::Sender<FilterResult>,
        errors: mpsc::Sender<WatcherError>,
        ack: mpsc::Receiver<()>,
    }

    fn harness(store: Arc<dyn CheckpointStore>) -> Harness {
        harness_with(store, Recorder::default())
    }

    fn harness_with(store: Arc<dyn CheckpointStore>, service: Recorder) -> Harness {
        let config = WatcherConfig {
            scan_width: 10,
            ..Default::default()
        };
        let checkpoint = CheckpointManager::new(store, &config.chain, &config.id);
        let (results_tx, results_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);
        let engine = Engine::new(
            config,
            service,
            checkpoint.clone(),
            results_rx,
            errors_rx,
            ack_tx,
        );
        Harness {
            engine,
            checkpoint,
            results: results_tx,
            errors: errors_tx,
            ack: ack_rx,
        }
    }

    #[tokio::test]
    async fn dispatches_each_block_once() {
        let mut h = harness(Arc::new(MemoryCheckpointStore::new()));
        let first = result(100, 109, 109, vec![block(101, "0xb", 1), block(105, "0xe", 2)], vec![]);
        h.engine.handle_result(&first).await.unwrap();
        h.engine.handle_result(&first).await.unwrap();

        let calls = h.engine.service().calls.lock().unwrap().clone();
        assert_eq!(calls, vec![("good", 101, None), ("good", 105, None)]);
        assert_eq!(h.checkpoint.get_checkpoint().await.unwrap(), Some(109));
    }

    #[tokio::test]
    async fn reorg_reverts_with_prior_artifacts_then_handles_new_view() {
        let mut h = harness(Arc::new(MemoryCheckpointStore::new()));
        h.engine
            .handle_result(&result(100, 109, 109, vec![block(105, "0xe", 2)], vec![]))
            .await
            .unwrap();
        h.engine
            .handle_result(&result(
                100,
                119,
                104,
                vec![block(105, "0xe2", 1)],
                vec![block(105, "0xe", 2)],
            ))
            .await
            .unwrap();

        let calls = h.engine.service().calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![("good", 105, None), ("reorg", 105, Some(2)), ("good", 105, None)]
        );
        assert_eq!(
            h.engine.metadata().get(105, "0xe").unwrap().state,
            BlockState::HandledReorg
        );
        assert_eq!(h.checkpoint.get_checkpoint().await.unwrap(), Some(104));
    }

    #[tokio::test]
    async fn reorg_of_unseen_block_is_fatal() {
        let mut h = harness(Arc::new(MemoryCheckpointStore::new()));
        let err = h
            .engine
            .handle_result(&result(100, 109, 104, vec![], vec![block(105, "0xe", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, WatcherError::InvalidTransition { block_number: 105, .. }));
        assert_eq!(h.checkpoint.get_checkpoint().await.unwrap(), None);
    }

    #[tokio::test]
    async fn metadata_evicted_with_tracker_threshold() {
        let mut h = harness(Arc::new(MemoryCheckpointStore::new()));
        h.engine
            .handle_result(&result(80, 89, 89, vec![block(81, "0xa", 1)], vec![]))
            .await
            .unwrap();
        h.engine
            .handle_result(&result(100, 109, 109, vec![block(101, "0xb", 1)], vec![]))
            .await
            .unwrap();
        assert!(h.engine.metadata().get(81, "0xa").is_none());
        assert!(h.engine.metadata().get(101, "0xb").is_some());
    }

    #[tokio::test]
    async fn checkpoint_failure_withholds_ack() {
        let mut h = harness(Arc::new(FailingStore));
        let cancel = CancellationToken::new();
        h.results
            .send(result(100, 109, 109, vec![block(101, "0xb", 1)], vec![]))
            .await
            .unwrap();
        let err = h.engine.run(cancel).await.unwrap_err();
        assert!(matches!(err, WatcherError::Storage(_)));
        assert!(h.ack.recv().await.is_none());
    }

    #[tokio::test]
    async fn handler_failure_keeps_checkpoint_and_withholds_ack() {
        let service = Recorder {
            fail_at: Some(105),
            ..Default::default()
        };
        let mut h = harness_with(Arc::new(MemoryCheckpointStore::new()), service);
        h.checkpoint.set_checkpoint(99).await.unwrap();
        h.results
            .send(result(100, 109, 109, vec![block(101, "0xb", 1), block(105, "0xe", 1)], vec![]))
            .await
            .unwrap();

        let err = h.engine.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, WatcherError::Handler(_)));
        assert_eq!(h.checkpoint.get_checkpoint().await.unwrap(), Some(99));
        assert!(h.ack.recv().await.is_none());
    }

    #[tokio::test]
    async fn acks_after_each_result_and_ends_on_close() {
        let h = harness(Arc::new(MemoryCheckpointStore::new()));
        let Harness {
            engine,
            checkpoint,
            results,
            errors,
            mut ack,
        } = h;
        let task = tokio::spawn(engine.run(CancellationToken::new()));

        results
            .send(result(100, 109, 109, vec![block(101, "0xb", 1)], vec![]))
            .await
            .unwrap();
        ack.recv().await.unwrap();
        assert_eq!(checkpoint.get_checkpoint().await.unwrap(), Some(109));

        drop(results);
        drop(errors);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn emitter_error_goes_to_service_hook() {
        let h = harness(Arc::new(MemoryCheckpointStore::new()));
        h.errors
            .send(WatcherError::MaxRetriesReached {
                from_block: 1,
                to_block: 2,
                retries: 6,
            })
            .await
            .unwrap();
        let err = h.engine.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, WatcherError::MaxRetriesReached { retries: 6, .. }));
    }
}
