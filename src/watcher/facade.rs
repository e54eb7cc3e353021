//! Public entry point tying the watcher components together.

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::{BoxError, WatchError};
use super::history::HistoryStore;
use super::identifier::FileIdentifier;
use super::lock::LockProvider;
use super::probe::{FileProbe, FsProbe};
use super::processor::WatchProcessor;
use super::registry::StoreRegistry;
use super::state::{FileState, WatchParameters};
use super::subscription::{Subscription, SubscriptionRegistry};
use crate::config::WatcherConfig;

/// Watches files, keeps a bounded history of each and notifies subscribers.
///
/// Creating a watcher starts the background polling loop on the current
/// tokio runtime. Every operation takes a caller token and is also
/// interrupted by [`shutdown`](Self::shutdown). After shutdown every
/// operation fails with [`WatchError::Disposed`].
///
/// ```no_run
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// use cyclic_file_watcher::config::WatcherConfig;
/// use cyclic_file_watcher::watcher::{BoxError, FileWatcher, WatchParameters};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let watcher = FileWatcher::new(WatcherConfig::new(Duration::from_secs(5)));
/// let cancel = CancellationToken::new();
///
/// let params = WatchParameters::new(
///     "/etc/app/token",
///     3,
///     |path: PathBuf| async move { tokio::fs::read_to_string(path).await },
///     |_: &std::path::Path, content: &String| Ok::<_, BoxError>(content.len().to_string()),
/// );
/// watcher.watch(params, &cancel).await?;
///
/// let latest = watcher.get_latest("/etc/app/token", &cancel).await?;
/// println!("{}", latest.content());
/// watcher.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct FileWatcher<C> {
    stores: Arc<StoreRegistry<C>>,
    subscriptions: Arc<SubscriptionRegistry<C>>,
    locks: Arc<LockProvider>,
    probe: Arc<dyn FileProbe>,
    shutdown: CancellationToken,
    disposed: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Send + Sync + 'static> FileWatcher<C> {
    /// Create a watcher on the real filesystem.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(config: WatcherConfig) -> Self {
        Self::with_probe(config, Arc::new(FsProbe::new()))
    }

    /// Create a watcher that reads file metadata through `probe`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn with_probe(config: WatcherConfig, probe: Arc<dyn FileProbe>) -> Self {
        let stores = Arc::new(StoreRegistry::new(
            Arc::clone(&probe),
            config.open_retry_delay,
        ));
        let subscriptions = Arc::new(SubscriptionRegistry::new());
        let locks = Arc::new(LockProvider::new());
        let shutdown = CancellationToken::new();

        let processor = WatchProcessor::new(
            Arc::clone(&stores),
            Arc::clone(&subscriptions),
            Arc::clone(&locks),
            config,
        );
        let token = shutdown.clone();
        let task = tokio::spawn(async move { processor.run(token).await });

        Self {
            stores,
            subscriptions,
            locks,
            probe,
            shutdown,
            disposed: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        }
    }

    fn ensure_active(&self) -> Result<(), WatchError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(WatchError::Disposed);
        }
        Ok(())
    }

    /// Run `operation` until it finishes, `cancel` fires or the watcher shuts
    /// down. Abandoning the operation drops any lock wait it was in.
    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        operation: impl Future<Output = Result<T, WatchError>>,
    ) -> Result<T, WatchError> {
        self.ensure_active()?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(WatchError::Cancelled),
            () = self.shutdown.cancelled() => Err(WatchError::Cancelled),
            result = operation => result,
        }
    }

    fn store(&self, identifier: &FileIdentifier) -> Result<Arc<HistoryStore<C>>, WatchError> {
        self.stores
            .get(identifier)
            .ok_or_else(|| WatchError::NotWatched(identifier.path().to_path_buf()))
    }

    /// Start watching a file.
    ///
    /// Registration is idempotent: watching an already watched path keeps its
    /// history and parameters. The first state is loaded lazily by the first
    /// read or tick. Returns `true` if the file was newly registered.
    ///
    /// # Errors
    ///
    /// - [`WatchError::InvalidDepth`] if the depth is zero
    /// - [`WatchError::FileNotFound`] if the file does not exist
    /// - [`WatchError::Disposed`] or [`WatchError::Cancelled`]
    pub async fn watch(
        &self,
        params: WatchParameters<C>,
        cancel: &CancellationToken,
    ) -> Result<bool, WatchError> {
        self.ensure_active()?;
        if params.depth() < 1 {
            return Err(WatchError::InvalidDepth(params.depth()));
        }
        if !self.probe.exists(params.path()) {
            return Err(WatchError::FileNotFound(params.path().to_path_buf()));
        }
        let identifier = params.identifier();

        self.guarded(cancel, async {
            let _lock = self
                .locks
                .acquire_exclusive(&identifier, &self.shutdown)
                .await?;

            // Shutdown may have drained the stores while this call waited.
            self.ensure_active()?;
            if !self.probe.exists(params.path()) {
                return Err(WatchError::FileNotFound(params.path().to_path_buf()));
            }

            let depth = params.depth();
            let created = self.stores.register(params);
            if created {
                tracing::info!(path = %identifier, depth, "Watching file");
            } else {
                tracing::debug!(path = %identifier, "File already watched");
            }
            Ok(created)
        })
        .await
    }

    /// Get the state of `path` stored under `key`.
    ///
    /// # Errors
    ///
    /// - [`WatchError::NotWatched`] if the path was never watched
    /// - [`WatchError::KeyNotFound`] if the key is unknown or evicted
    /// - first-load failures, [`WatchError::Disposed`] or [`WatchError::Cancelled`]
    pub async fn get(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<FileState<C>>, WatchError> {
        let identifier = FileIdentifier::new(path);
        self.guarded(cancel, async {
            let store = self.store(&identifier)?;
            let _lock = self
                .locks
                .acquire_shared(&identifier, &self.shutdown)
                .await?;
            store.get(key, &self.shutdown).await
        })
        .await
    }

    /// Get the most recent state of `path`.
    ///
    /// # Errors
    ///
    /// - [`WatchError::NotWatched`] if the path was never watched
    /// - first-load failures, [`WatchError::Disposed`] or [`WatchError::Cancelled`]
    pub async fn get_latest(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<Arc<FileState<C>>, WatchError> {
        let identifier = FileIdentifier::new(path);
        self.guarded(cancel, async {
            let store = self.store(&identifier)?;
            let _lock = self
                .locks
                .acquire_shared(&identifier, &self.shutdown)
                .await?;
            store.get_latest(&self.shutdown).await
        })
        .await
    }

    /// Retained keys of `path`, oldest first.
    ///
    /// # Errors
    ///
    /// - [`WatchError::NotWatched`] if the path was never watched
    /// - [`WatchError::Disposed`] or [`WatchError::Cancelled`]
    pub async fn keys(
        &self,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, WatchError> {
        let identifier = FileIdentifier::new(path);
        self.guarded(cancel, async {
            let store = self.store(&identifier)?;
            let _lock = self
                .locks
                .acquire_shared(&identifier, &self.shutdown)
                .await?;
            Ok(store.keys().await)
        })
        .await
    }

    /// Every watched file, sorted. Empty after shutdown.
    #[must_use]
    pub fn watched(&self) -> Vec<FileIdentifier> {
        self.stores.identifiers()
    }

    /// Register `callback` for changes of `path`.
    ///
    /// The path does not need to be watched yet.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Disposed`] or [`WatchError::Cancelled`].
    pub async fn subscribe<F, Fut, E>(
        &self,
        path: impl AsRef<Path>,
        callback: F,
        cancel: &CancellationToken,
    ) -> Result<Subscription, WatchError>
    where
        F: Fn(Arc<FileState<C>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let identifier = FileIdentifier::new(path);
        self.guarded(
            cancel,
            self.subscriptions.subscribe(identifier, callback, &self.shutdown),
        )
        .await
    }

    /// Remove a subscription. Unknown subscriptions are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Disposed`] or [`WatchError::Cancelled`].
    pub async fn unsubscribe(
        &self,
        subscription: &Subscription,
        cancel: &CancellationToken,
    ) -> Result<(), WatchError> {
        self.guarded(
            cancel,
            self.subscriptions.unsubscribe(subscription, &self.shutdown),
        )
        .await
    }

    /// Stop the polling loop and release every retained state.
    ///
    /// Waits for the current tick to unwind. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Watch loop ended abnormally");
            }
        }

        let mut released = 0;
        for store in self.stores.drain() {
            released += store.dispose().await;
        }
        self.subscriptions.clear();
        self.locks.clear();

        tracing::info!(released, "File watcher shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl<C> Drop for FileWatcher<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
