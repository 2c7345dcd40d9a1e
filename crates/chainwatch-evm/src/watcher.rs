//! Wires an [`Emitter`] and an [`Engine`] together over the three handoff
//! channels and runs them side by side.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use chainwatch_core::checkpoint::{CheckpointManager, CheckpointStore};
use chainwatch_core::config::WatcherConfig;
use chainwatch_core::error::WatcherError;
use chainwatch_core::handler::ServiceEngine;

use crate::emitter::Emitter;
use crate::engine::Engine;
use crate::fetcher::ChainClient;

/// A ready-to-run emitter/engine pair for one address/topic set on one chain.
pub struct Watcher<C, S: ServiceEngine> {
    emitter: Emitter<C>,
    engine: Engine<S>,
}

impl<C, S> Watcher<C, S>
where
    C: ChainClient,
    S: ServiceEngine,
{
    /// Validate `config` and connect both sides.
    ///
    /// Every channel holds a single item, and the emitter waits for the ack of
    /// each result, so at most one window is ever in flight.
    pub fn new(
        config: WatcherConfig,
        client: C,
        store: Arc<dyn CheckpointStore>,
        service: S,
    ) -> Result<Self, WatcherError> {
        config.validate()?;

        let checkpoint = CheckpointManager::new(store, &config.chain, &config.id);
        let (results_tx, results_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let (ack_tx, ack_rx) = mpsc::channel(1);

        let emitter = Emitter::new(
            config.clone(),
            client,
            checkpoint.clone(),
            results_tx,
            errors_tx,
            ack_rx,
        );
        let engine = Engine::new(config, service, checkpoint, results_rx, errors_rx, ack_tx);

        Ok(Self { emitter, engine })
    }

    /// Split into the two halves, e.g. to drive them on separate tasks.
    pub fn into_parts(self) -> (Emitter<C>, Engine<S>) {
        (self.emitter, self.engine)
    }

    /// Run both halves until cancellation or a fatal error.
    ///
    /// Both halves run on a child of `cancel`: cancelling `cancel` stops them,
    /// but a failing engine only cancels the child, never the caller's token.
    /// A failing emitter closes its channels, so the engine drains, reports
    /// the error to the service, and exits. The engine's error wins when both
    /// fail.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), WatcherError> {
        let child = cancel.child_token();
        let engine_cancel = child.clone();
        let emitter = self.emitter.run(child.clone());
        let engine = async move {
            let res = self.engine.run(engine_cancel.clone()).await;
            if res.is_err() {
                engine_cancel.cancel();
            }
            res
        };

        match tokio::join!(emitter, engine) {
            (_, Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Ok(()), Ok(())) => Ok(()),
        }
    }
}
