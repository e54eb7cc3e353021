//! Background polling loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::join_all;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use super::error::{panic_message, BoxError, ReloadFailure, SubscribeFailure, TickFailure};
use super::history::HistoryStore;
use super::lock::LockProvider;
use super::registry::StoreRegistry;
use super::state::FileState;
use super::subscription::SubscriptionRegistry;
use crate::config::WatcherConfig;

/// Polls every registered file and notifies subscribers of changes.
///
/// Each tick reloads all files concurrently. A file is reloaded under its
/// exclusive lock; its subscribers run after the lock is released, so they
/// may read the file back. Failures are collected per file and handed to
/// the configured hooks once the whole tick has finished.
pub struct WatchProcessor<C> {
    stores: Arc<StoreRegistry<C>>,
    subscriptions: Arc<SubscriptionRegistry<C>>,
    locks: Arc<LockProvider>,
    config: WatcherConfig,
}

impl<C: Send + Sync + 'static> WatchProcessor<C> {
    /// Create a processor over shared registries.
    #[must_use]
    pub fn new(
        stores: Arc<StoreRegistry<C>>,
        subscriptions: Arc<SubscriptionRegistry<C>>,
        locks: Arc<LockProvider>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            stores,
            subscriptions,
            locks,
            config,
        }
    }

    /// Tick until `cancel` fires.
    ///
    /// The poll interval is waited after every tick, whether or not it had
    /// failures. Cancellation interrupts an in-flight tick at its next
    /// suspension point.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_ms = self.config.poll_interval.as_millis(),
            "Watch loop started"
        );

        loop {
            let failures = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                failures = self.tick(&cancel) => failures,
            };

            if !failures.is_empty() {
                tracing::debug!(failures = failures.len(), "Tick finished with failures");
            }
            self.dispatch(failures).await;

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!("Watch loop stopped");
    }

    /// Run one polling pass over a snapshot of the registered files.
    ///
    /// Returns the failures of this pass without dispatching them.
    pub async fn tick(&self, cancel: &CancellationToken) -> Vec<TickFailure> {
        let stores = self.stores.all();
        tracing::trace!(files = stores.len(), "Polling files");

        join_all(stores.iter().map(|store| self.process(store, cancel)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn process(
        &self,
        store: &Arc<HistoryStore<C>>,
        cancel: &CancellationToken,
    ) -> Option<TickFailure> {
        let identifier = store.identifier();

        // A panicking loader, deriver or hook fails only this file's tick.
        let reloaded = AssertUnwindSafe(self.reload(store, cancel))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(panic_message("reload", panic.as_ref()).into()));

        let latest = match reloaded {
            Ok(Some(latest)) => latest,
            Ok(None) => return None,
            Err(_) if cancel.is_cancelled() => return None,
            Err(source) => {
                return Some(TickFailure::Reload(ReloadFailure {
                    identifier: identifier.clone(),
                    source,
                }))
            }
        };

        let notified = AssertUnwindSafe(self.notify(&latest))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(panic_message("subscriber notification", panic.as_ref()).into())
            });

        match notified {
            Ok(()) => None,
            Err(source) => Some(TickFailure::Subscribe(SubscribeFailure {
                identifier: identifier.clone(),
                source,
            })),
        }
    }

    /// Refresh under the exclusive lock. Returns the new latest state if one
    /// was appended.
    async fn reload(
        &self,
        store: &HistoryStore<C>,
        cancel: &CancellationToken,
    ) -> Result<Option<Arc<FileState<C>>>, BoxError> {
        let _lock = self
            .locks
            .acquire_exclusive(store.identifier(), cancel)
            .await?;

        if !store.refresh_if_changed(cancel).await? {
            return Ok(None);
        }
        let latest = store.get_latest(cancel).await?;
        self.config.hooks.on_reloaded(store.identifier()).await?;
        Ok(Some(latest))
    }

    async fn notify(&self, latest: &Arc<FileState<C>>) -> Result<(), BoxError> {
        self.subscriptions.trigger(latest).await?;
        self.config
            .hooks
            .on_subscribers_notified(latest.identifier())
            .await
    }

    async fn dispatch(&self, failures: Vec<TickFailure>) {
        for failure in failures {
            match failure {
                TickFailure::Reload(failure) => self.config.hooks.on_reload_failed(&failure).await,
                TickFailure::Subscribe(failure) => {
                    self.config.hooks.on_subscribe_failed(&failure).await;
                }
            }
        }
    }
}
