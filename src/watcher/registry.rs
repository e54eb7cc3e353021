//! Registry of per-file history stores.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::history::HistoryStore;
use super::identifier::FileIdentifier;
use super::probe::FileProbe;
use super::state::WatchParameters;

/// Concurrent map from [`FileIdentifier`] to its [`HistoryStore`].
///
/// Registration is idempotent: the first parameters registered for an
/// identifier win and later registrations are ignored.
pub struct StoreRegistry<C> {
    stores: DashMap<FileIdentifier, Arc<HistoryStore<C>>>,
    probe: Arc<dyn FileProbe>,
    open_retry_delay: Duration,
}

impl<C: Send + Sync + 'static> StoreRegistry<C> {
    /// Create an empty registry whose stores use `probe`.
    #[must_use]
    pub fn new(probe: Arc<dyn FileProbe>, open_retry_delay: Duration) -> Self {
        Self {
            stores: DashMap::new(),
            probe,
            open_retry_delay,
        }
    }

    /// Register a store for the parameters' file.
    ///
    /// Returns `true` if a new store was created.
    pub fn register(&self, params: WatchParameters<C>) -> bool {
        match self.stores.entry(params.identifier()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                let store =
                    HistoryStore::new(params, Arc::clone(&self.probe), self.open_retry_delay);
                entry.insert(Arc::new(store));
                true
            }
        }
    }

    /// Look up the store for `identifier`.
    #[must_use]
    pub fn get(&self, identifier: &FileIdentifier) -> Option<Arc<HistoryStore<C>>> {
        self.stores.get(identifier).map(|s| Arc::clone(s.value()))
    }

    /// Whether `identifier` is registered.
    #[must_use]
    pub fn contains(&self, identifier: &FileIdentifier) -> bool {
        self.stores.contains_key(identifier)
    }

    /// Snapshot of every registered store.
    ///
    /// Stores registered after the snapshot is taken are not included.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<HistoryStore<C>>> {
        self.stores.iter().map(|s| Arc::clone(s.value())).collect()
    }

    /// Registered identifiers, sorted.
    #[must_use]
    pub fn identifiers(&self) -> Vec<FileIdentifier> {
        let mut ids: Vec<_> = self.stores.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered stores.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no store is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// Remove every store and return them for disposal.
    pub fn drain(&self) -> Vec<Arc<HistoryStore<C>>> {
        let stores = self.all();
        self.stores.clear();
        stores
    }
}
