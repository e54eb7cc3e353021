//! Watcher error types.

use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use super::identifier::FileIdentifier;
use super::subscription::SubscriptionId;

/// Boxed error returned by caller-supplied collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while watching files or reading their history.
#[derive(thiserror::Error, Debug)]
pub enum WatchError {
    /// History depth must be at least one.
    #[error("Depth must be greater than 0, got {0}")]
    InvalidDepth(usize),

    /// The file does not exist on disk.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The file was never registered with `watch`.
    #[error("File is not watched: {0}")]
    NotWatched(PathBuf),

    /// The key was never loaded or has already been evicted.
    #[error("Key {key} not found for {path} or already evicted")]
    KeyNotFound { path: PathBuf, key: String },

    /// A store has no state although initialization completed.
    #[error("No state loaded for {0}")]
    NotInitialized(PathBuf),

    /// The content loader failed.
    #[error("Failed to load content for {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// The key deriver failed.
    #[error("Failed to derive key for {path}: {source}")]
    KeyDerivation {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// I/O error while probing the file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The watcher has been shut down.
    #[error("File watcher has been shut down")]
    Disposed,

    /// The operation was cancelled while waiting.
    #[error("Operation cancelled")]
    Cancelled,
}

impl WatchError {
    /// Whether this error means the addressed file is unknown or missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_) | Self::NotWatched(_))
    }
}

/// A subscriber callback failed or panicked during fan-out.
#[derive(thiserror::Error, Debug)]
#[error("Subscriber {subscription_id} failed: {source}")]
pub struct SubscriberFailure {
    /// Subscription whose callback failed.
    pub subscription_id: SubscriptionId,
    /// The callback's error.
    #[source]
    pub source: BoxError,
}

/// Every subscriber failure collected during one trigger.
#[derive(Debug)]
pub struct TriggerError {
    /// File whose subscribers were triggered.
    pub identifier: FileIdentifier,
    /// One entry per failed callback.
    pub failures: Vec<SubscriberFailure>,
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} subscriber(s) failed for {}",
            self.failures.len(),
            self.identifier
        )?;
        for failure in &self.failures {
            write!(f, "; {failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TriggerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f as &(dyn std::error::Error + 'static))
    }
}

/// A reload attempt failed during a tick.
#[derive(thiserror::Error, Debug)]
#[error("Reload failed for {identifier}: {source}")]
pub struct ReloadFailure {
    /// File whose reload failed.
    pub identifier: FileIdentifier,
    /// Underlying cause.
    #[source]
    pub source: BoxError,
}

/// Subscriber fan-out or the subscribe-action hook failed during a tick.
#[derive(thiserror::Error, Debug)]
#[error("Subscription action failed for {identifier}: {source}")]
pub struct SubscribeFailure {
    /// File whose subscribers were being notified.
    pub identifier: FileIdentifier,
    /// Underlying cause.
    #[source]
    pub source: BoxError,
}

/// A per-file failure collected by the watch loop.
#[derive(Debug)]
pub enum TickFailure {
    /// Probing, loading or the reloaded hook failed.
    Reload(ReloadFailure),
    /// Subscribers or the subscribe-action hook failed.
    Subscribe(SubscribeFailure),
}

impl TickFailure {
    /// File the failure belongs to.
    #[must_use]
    pub fn identifier(&self) -> &FileIdentifier {
        match self {
            Self::Reload(f) => &f.identifier,
            Self::Subscribe(f) => &f.identifier,
        }
    }
}

/// Describe a caught panic payload.
pub(crate) fn panic_message(context: &str, payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("{context} panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("{context} panicked: {s}")
    } else {
        format!("{context} panicked")
    }
}
