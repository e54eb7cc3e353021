//! Polling file watcher with bounded per-file history.
//!
//! A [`FileWatcher`] polls every watched file on a fixed interval. When a
//! file's last-modified timestamp moves, its content is reloaded, stored
//! under a caller-derived key and the oldest state beyond the file's depth
//! is evicted. Subscribers are notified after each reload.

mod error;
mod facade;
mod history;
mod hooks;
mod identifier;
mod lock;
mod probe;
mod processor;
mod registry;
mod state;
mod subscription;


pub use error::{
    BoxError, ReloadFailure, SubscribeFailure, SubscriberFailure, TickFailure, TriggerError,
    WatchError,
};
pub use facade::FileWatcher;
pub use history::{HistoryStore, DEFAULT_OPEN_RETRY_DELAY};
pub use hooks::{LoggingHooks, WatchHooks};
pub use identifier::FileIdentifier;
pub use lock::{ExclusiveLock, LockProvider, SharedLock};
pub use probe::{FileProbe, FsProbe};
pub use processor::WatchProcessor;
pub use registry::StoreRegistry;
pub use state::{ContentLoader, FileState, KeyDeriver, WatchParameters};
pub use subscription::{Subscription, SubscriptionId, SubscriptionRegistry};
