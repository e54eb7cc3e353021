//! Runtime configuration of the watcher.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::watcher::{LoggingHooks, WatchHooks, DEFAULT_OPEN_RETRY_DELAY};

/// Configuration consumed by [`FileWatcher`](crate::watcher::FileWatcher).
#[derive(Clone)]
pub struct WatcherConfig {
    /// Delay between the end of one tick and the start of the next.
    pub poll_interval: Duration,
    /// Delay between readability checks while another writer holds a file.
    pub open_retry_delay: Duration,
    /// Callbacks invoked by the watch loop.
    pub hooks: Arc<dyn WatchHooks>,
}

impl WatcherConfig {
    /// Config polling every `poll_interval`, logging loop events.
    #[must_use]
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            open_retry_delay: DEFAULT_OPEN_RETRY_DELAY,
            hooks: Arc::new(LoggingHooks),
        }
    }

    /// Replace the loop callbacks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn WatchHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the readability retry delay.
    #[must_use]
    pub fn with_open_retry_delay(mut self, delay: Duration) -> Self {
        self.open_retry_delay = delay;
        self
    }
}

impl fmt::Debug for WatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatcherConfig")
            .field("poll_interval", &self.poll_interval)
            .field("open_retry_delay", &self.open_retry_delay)
            .finish_non_exhaustive()
    }
}
