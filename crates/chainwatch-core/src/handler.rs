//! Business handler trait driven by the engine.

use async_trait::async_trait;

use crate::error::WatcherError;
use crate::types::Log;

/// User-provided business logic for one watcher.
///
/// `Artifacts` is whatever the handler wants carried forward per block, so a
/// later reorg can revert against what was produced for it.
#[async_trait]
pub trait ServiceEngine: Send + Sync {
    type Artifacts: Clone + Send + Sync + 'static;

    /// Called once per newly seen block with its logs.
    async fn handle_good_logs(
        &self,
        logs: &[Log],
        prior: Option<&Self::Artifacts>,
    ) -> Result<Self::Artifacts, WatcherError>;

    /// Called once per reorged block with its superseded logs (all `removed`).
    async fn handle_reorged_logs(
        &self,
        logs: &[Log],
        prior: Option<&Self::Artifacts>,
    ) -> Result<Self::Artifacts, WatcherError>;

    /// Called when the emitter stops on a fatal error.
    ///
    /// Returning `Err` ends the engine with that error; `Ok` lets it drain
    /// and exit when the emitter closes its channels.
    async fn handle_emitter_fatal_error(&self, err: WatcherError) -> Result<(), WatcherError> {
        Err(err)
    }
}
