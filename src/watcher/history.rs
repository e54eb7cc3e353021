//! Bounded version history of a single file.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OnceCell};
use tokio_util::sync::CancellationToken;

use super::error::WatchError;
use super::identifier::FileIdentifier;
use super::probe::FileProbe;
use super::state::{FileState, WatchParameters};

/// Delay between readability checks while a writer holds the file.
pub const DEFAULT_OPEN_RETRY_DELAY: Duration = Duration::from_secs(1);

struct History<C> {
    states: HashMap<String, Arc<FileState<C>>>,
    /// Keys oldest first. Same length as `states`.
    order: VecDeque<String>,
}

impl<C> History<C> {
    fn new() -> Self {
        Self {
            states: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn latest(&self) -> Option<Arc<FileState<C>>> {
        self.order
            .back()
            .and_then(|key| self.states.get(key))
            .cloned()
    }
}

/// Retains the most recent states of one file, up to its configured depth.
///
/// The first state is loaded lazily by whichever operation needs it first;
/// concurrent callers wait for that single load. Inserting past the depth
/// evicts the oldest state. Evicted content is dropped once the last reader
/// releases its `Arc`.
pub struct HistoryStore<C> {
    identifier: FileIdentifier,
    params: WatchParameters<C>,
    probe: Arc<dyn FileProbe>,
    open_retry_delay: Duration,
    initialized: OnceCell<()>,
    history: Mutex<History<C>>,
}

impl<C: Send + Sync + 'static> HistoryStore<C> {
    /// Create a store. No I/O happens until the first read or refresh.
    #[must_use]
    pub fn new(
        params: WatchParameters<C>,
        probe: Arc<dyn FileProbe>,
        open_retry_delay: Duration,
    ) -> Self {
        Self {
            identifier: params.identifier(),
            params,
            probe,
            open_retry_delay,
            initialized: OnceCell::new(),
            history: Mutex::new(History::new()),
        }
    }

    /// File this store tracks.
    #[must_use]
    pub fn identifier(&self) -> &FileIdentifier {
        &self.identifier
    }

    /// Maximum number of retained states.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.params.depth()
    }

    /// Whether the first state has been loaded.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.initialized()
    }

    /// Load the first state unless another caller already did.
    ///
    /// A failed first load leaves the store uninitialized; the next caller
    /// tries again.
    ///
    /// # Errors
    ///
    /// Propagates probe and collaborator failures, or
    /// [`WatchError::Cancelled`].
    pub async fn ensure_initialized(&self, cancel: &CancellationToken) -> Result<(), WatchError> {
        let init = self.initialized.get_or_try_init(|| async {
            let modified_at = self.probe.last_modified(self.params.path())?;
            let state = self.append(modified_at).await?;
            tracing::debug!(
                path = %self.identifier,
                key = %state.key(),
                "Loaded initial file state"
            );
            Ok::<_, WatchError>(())
        });
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(WatchError::Cancelled),
            result = init => result.map(|_| ()),
        }
    }

    /// Get the state stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::KeyNotFound`] if the key was never loaded or has
    /// been evicted, or any error from initialization.
    pub async fn get(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<FileState<C>>, WatchError> {
        self.ensure_initialized(cancel).await?;
        let history = self.history.lock().await;
        history
            .states
            .get(key)
            .cloned()
            .ok_or_else(|| WatchError::KeyNotFound {
                path: self.identifier.path().to_path_buf(),
                key: key.to_string(),
            })
    }

    /// Get the most recently inserted state.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NotInitialized`] if the history is empty after
    /// initialization, or any error from initialization.
    pub async fn get_latest(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<FileState<C>>, WatchError> {
        self.ensure_initialized(cancel).await?;
        self.history
            .lock()
            .await
            .latest()
            .ok_or_else(|| WatchError::NotInitialized(self.identifier.path().to_path_buf()))
    }

    /// Retained keys, oldest first.
    pub async fn keys(&self) -> Vec<String> {
        self.history.lock().await.order.iter().cloned().collect()
    }

    /// Number of retained states.
    pub async fn len(&self) -> usize {
        self.history.lock().await.states.len()
    }

    /// Whether no state is retained.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Reload the file if its last-modified timestamp moved.
    ///
    /// Waits, retrying every `open_retry_delay`, until the probe reports the
    /// file readable, then loads content and key and appends the new state.
    /// Returns `true` iff a state was appended.
    ///
    /// # Errors
    ///
    /// Propagates probe, loader and key deriver failures unchanged, or
    /// [`WatchError::Cancelled`] if cancelled while waiting.
    pub async fn refresh_if_changed(&self, cancel: &CancellationToken) -> Result<bool, WatchError> {
        self.ensure_initialized(cancel).await?;

        let Some(latest) = self.history.lock().await.latest() else {
            return Ok(false);
        };

        let modified_at = self.probe.last_modified(self.params.path())?;
        if modified_at == latest.modified_at() {
            return Ok(false);
        }

        self.wait_until_readable(cancel).await?;

        let state = self.append(modified_at).await?;
        tracing::debug!(
            path = %self.identifier,
            key = %state.key(),
            modified_at = %state.modified_at(),
            "Appended file state"
        );
        Ok(true)
    }

    async fn wait_until_readable(&self, cancel: &CancellationToken) -> Result<(), WatchError> {
        let path = self.params.path();
        let mut attempts = 0_u32;
        while !self.probe.can_open_exclusively(path) {
            attempts += 1;
            if attempts == 1 {
                tracing::debug!(path = %self.identifier, "File busy, waiting for writer");
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(WatchError::Cancelled),
                () = tokio::time::sleep(self.open_retry_delay) => {}
            }
        }
        if attempts > 0 {
            tracing::debug!(path = %self.identifier, attempts, "File readable again");
        }
        Ok(())
    }

    async fn append(&self, modified_at: DateTime<Utc>) -> Result<Arc<FileState<C>>, WatchError> {
        let path = self.params.path();
        let content = self
            .params
            .loader()
            .load(path)
            .await
            .map_err(|source| WatchError::Load {
                path: path.to_path_buf(),
                source,
            })?;
        let key = self
            .params
            .key_deriver()
            .derive_key(path, &content)
            .await
            .map_err(|source| WatchError::KeyDerivation {
                path: path.to_path_buf(),
                source,
            })?;

        let state = Arc::new(FileState::new(
            self.identifier.clone(),
            key.clone(),
            modified_at,
            content,
        ));

        let mut history = self.history.lock().await;
        if history.states.insert(key.clone(), Arc::clone(&state)).is_some() {
            history.order.retain(|k| k != &key);
            tracing::warn!(
                path = %self.identifier,
                %key,
                "Version key reused, replacing older state"
            );
        }
        history.order.push_back(key);

        while history.order.len() > self.depth() {
            let Some(oldest) = history.order.pop_front() else {
                break;
            };
            if history.states.remove(&oldest).is_some() {
                tracing::debug!(path = %self.identifier, key = %oldest, "Evicted file state");
            }
        }

        Ok(state)
    }

    /// Drop every retained state. Returns how many were released.
    pub async fn dispose(&self) -> usize {
        let mut history = self.history.lock().await;
        let released = history.states.len();
        history.order.clear();
        history.states.clear();
        released
    }
}
