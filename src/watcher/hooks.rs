//! Callbacks invoked by the watch loop.

use async_trait::async_trait;

use super::error::{BoxError, ReloadFailure, SubscribeFailure};
use super::identifier::FileIdentifier;

/// Observer of the background watch loop.
///
/// The success hooks run inside the per-file tick: an error from
/// [`on_reloaded`](Self::on_reloaded) is reported as a reload failure, an
/// error from [`on_subscribers_notified`](Self::on_subscribers_notified) as a
/// subscribe failure. Failure hooks run after every file of the tick has
/// finished, once per failure.
#[async_trait]
pub trait WatchHooks: Send + Sync {
    /// A new state was appended. Called while the file's exclusive lock is held.
    async fn on_reloaded(&self, identifier: &FileIdentifier) -> Result<(), BoxError>;

    /// Probing, loading or [`on_reloaded`](Self::on_reloaded) failed.
    async fn on_reload_failed(&self, failure: &ReloadFailure);

    /// Every subscriber of a reloaded file completed successfully.
    async fn on_subscribers_notified(&self, identifier: &FileIdentifier) -> Result<(), BoxError>;

    /// A subscriber or [`on_subscribers_notified`](Self::on_subscribers_notified) failed.
    async fn on_subscribe_failed(&self, failure: &SubscribeFailure);
}

/// Hooks that only emit tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHooks;

#[async_trait]
impl WatchHooks for LoggingHooks {
    async fn on_reloaded(&self, identifier: &FileIdentifier) -> Result<(), BoxError> {
        tracing::info!(path = %identifier, "File reloaded");
        Ok(())
    }

    async fn on_reload_failed(&self, failure: &ReloadFailure) {
        tracing::warn!(path = %failure.identifier, error = %failure.source, "Reload failed");
    }

    async fn on_subscribers_notified(&self, identifier: &FileIdentifier) -> Result<(), BoxError> {
        tracing::debug!(path = %identifier, "Subscribers notified");
        Ok(())
    }

    async fn on_subscribe_failed(&self, failure: &SubscribeFailure) {
        tracing::warn!(
            path = %failure.identifier,
            error = %failure.source,
            "Subscriber notification failed"
        );
    }
}
