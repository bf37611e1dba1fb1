//! Manager contract.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// `run()` was called before `create()` wired the manager.
    #[error("create() must be called before run()")]
    NotWired,
}

/// A long-running collection orchestrator.
///
/// Wiring happens through an inherent `create` method on each concrete
/// manager, since the feed and accumulator types differ per manager.
#[async_trait]
pub trait FeedManager: Send + Sync {
    /// Name used in logs and as the collector segment of publish keys.
    fn name(&self) -> &str;

    /// Run until [`stop`](Self::stop) is called. Fails fast if the manager
    /// was never wired.
    async fn run(&self) -> Result<(), ManagerError>;

    /// Signal the run loop to shut down.
    async fn stop(&self);
}
