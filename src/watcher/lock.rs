//! Per-file reader/writer locks.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio_util::sync::CancellationToken;

use super::error::WatchError;
use super::identifier::FileIdentifier;

/// Shared possession of a file's lock. Released on drop.
#[derive(Debug)]
pub struct SharedLock {
    _guard: OwnedRwLockReadGuard<()>,
}

/// Exclusive possession of a file's lock. Released on drop.
#[derive(Debug)]
pub struct ExclusiveLock {
    _guard: OwnedRwLockWriteGuard<()>,
}

/// Hands out one reader/writer lock per [`FileIdentifier`].
///
/// Locks are created on first use and kept for the provider's lifetime.
/// Acquisition waits until the lock is granted or the token is cancelled;
/// a cancelled wait leaves the lock untouched.
#[derive(Debug, Default)]
pub struct LockProvider {
    locks: DashMap<FileIdentifier, Arc<RwLock<()>>>,
}

impl LockProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, identifier: &FileIdentifier) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.get(identifier) {
            return Arc::clone(lock.value());
        }
        // entry() holds the shard write lock, so racing callers get one instance.
        Arc::clone(
            self.locks
                .entry(identifier.clone())
                .or_insert_with(|| Arc::new(RwLock::new(())))
                .value(),
        )
    }

    /// Acquire the lock for reading.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Cancelled`] if `cancel` fires first.
    pub async fn acquire_shared(
        &self,
        identifier: &FileIdentifier,
        cancel: &CancellationToken,
    ) -> Result<SharedLock, WatchError> {
        let lock = self.lock_for(identifier);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(WatchError::Cancelled),
            guard = lock.read_owned() => Ok(SharedLock { _guard: guard }),
        }
    }

    /// Acquire the lock for writing.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Cancelled`] if `cancel` fires first.
    pub async fn acquire_exclusive(
        &self,
        identifier: &FileIdentifier,
        cancel: &CancellationToken,
    ) -> Result<ExclusiveLock, WatchError> {
        let lock = self.lock_for(identifier);
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(WatchError::Cancelled),
            guard = lock.write_owned() => Ok(ExclusiveLock { _guard: guard }),
        }
    }

    /// Number of identifiers that have a lock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop every lock. Outstanding guards stay valid until released.
    pub fn clear(&self) {
        self.locks.clear();
    }
}
