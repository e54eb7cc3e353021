//! Subscriber callbacks and their fan-out.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::error::{
    panic_message, BoxError, SubscriberFailure, TriggerError, WatchError,
};
use super::identifier::FileIdentifier;
use super::state::FileState;

/// Unique id of one callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for SubscriptionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Token returned by `subscribe`, used to cancel that registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    id: SubscriptionId,
    identifier: FileIdentifier,
}

impl Subscription {
    /// Id of this registration.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// File the callback is registered for.
    #[must_use]
    pub fn identifier(&self) -> &FileIdentifier {
        &self.identifier
    }
}

type Callback<C> =
    Arc<dyn Fn(Arc<FileState<C>>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

type CallbackSet<C> = Arc<Mutex<HashMap<SubscriptionId, Callback<C>>>>;

/// Per-file sets of subscriber callbacks.
///
/// Each file's set has its own guard, so subscribing to one file never waits
/// on another. A trigger snapshots the set under the guard and runs the
/// callbacks after releasing it; callbacks may subscribe or unsubscribe.
pub struct SubscriptionRegistry<C> {
    subscribers: DashMap<FileIdentifier, CallbackSet<C>>,
}

impl<C: Send + Sync + 'static> SubscriptionRegistry<C> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
        }
    }

    fn set_for(&self, identifier: &FileIdentifier) -> CallbackSet<C> {
        Arc::clone(
            self.subscribers
                .entry(identifier.clone())
                .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
                .value(),
        )
    }

    /// Register `callback` for updates to `identifier`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Cancelled`] if `cancel` fires while waiting for
    /// the file's guard.
    pub async fn subscribe<F, Fut, E>(
        &self,
        identifier: FileIdentifier,
        callback: F,
        cancel: &CancellationToken,
    ) -> Result<Subscription, WatchError>
    where
        F: Fn(Arc<FileState<C>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let callback: Callback<C> = Arc::new(move |state| {
            callback(state)
                .map(|r| r.map_err(Into::<BoxError>::into))
                .boxed()
        });

        let set = self.set_for(&identifier);
        let mut set = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(WatchError::Cancelled),
            guard = set.lock() => guard,
        };

        let id = SubscriptionId::generate();
        set.insert(id, callback);
        tracing::debug!(path = %identifier, subscription = %id, "Subscribed");

        Ok(Subscription { id, identifier })
    }

    /// Remove a registration. Unknown subscriptions are ignored.
    ///
    /// Triggers already running keep the callback; later triggers do not
    /// see it.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Cancelled`] if `cancel` fires while waiting for
    /// the file's guard.
    pub async fn unsubscribe(
        &self,
        subscription: &Subscription,
        cancel: &CancellationToken,
    ) -> Result<(), WatchError> {
        let Some(set) = self
            .subscribers
            .get(&subscription.identifier)
            .map(|s| Arc::clone(s.value()))
        else {
            return Ok(());
        };

        let mut set = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(WatchError::Cancelled),
            guard = set.lock() => guard,
        };
        if set.remove(&subscription.id).is_some() {
            tracing::debug!(
                path = %subscription.identifier,
                subscription = %subscription.id,
                "Unsubscribed"
            );
        }
        Ok(())
    }

    /// Number of callbacks registered for `identifier`.
    pub async fn count(&self, identifier: &FileIdentifier) -> usize {
        let Some(set) = self
            .subscribers
            .get(identifier)
            .map(|s| Arc::clone(s.value()))
        else {
            return 0;
        };
        let count = set.lock().await.len();
        count
    }

    /// Invoke every callback registered for the state's file.
    ///
    /// All callbacks run concurrently and are awaited to completion before
    /// any failure is inspected. Returns how many callbacks ran.
    ///
    /// # Errors
    ///
    /// Returns a [`TriggerError`] listing every callback that failed or
    /// panicked.
    pub async fn trigger(&self, state: &Arc<FileState<C>>) -> Result<usize, TriggerError> {
        let identifier = state.identifier();
        let Some(set) = self
            .subscribers
            .get(identifier)
            .map(|s| Arc::clone(s.value()))
        else {
            return Ok(0);
        };
        let callbacks: Vec<(SubscriptionId, Callback<C>)> = set
            .lock()
            .await
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        let dispatched = callbacks.len();
        let results = join_all(callbacks.into_iter().map(|(id, callback)| {
            let state = Arc::clone(state);
            async move {
                let outcome = AssertUnwindSafe(callback(state)).catch_unwind().await;
                (id, outcome)
            }
        }))
        .await;

        let failures: Vec<SubscriberFailure> = results
            .into_iter()
            .filter_map(|(subscription_id, outcome)| match outcome {
                Ok(Ok(())) => None,
                Ok(Err(source)) => Some(SubscriberFailure {
                    subscription_id,
                    source,
                }),
                Err(panic) => Some(SubscriberFailure {
                    subscription_id,
                    source: panic_message("subscriber", panic.as_ref()).into(),
                }),
            })
            .collect();

        if failures.is_empty() {
            tracing::debug!(
                path = %identifier,
                subscribers = dispatched,
                "Triggered subscribers"
            );
            Ok(dispatched)
        } else {
            tracing::debug!(
                path = %identifier,
                subscribers = dispatched,
                failed = failures.len(),
                "Some subscribers failed"
            );
            Err(TriggerError {
                identifier: identifier.clone(),
                failures,
            })
        }
    }

    /// Forget every callback.
    pub fn clear(&self) {
        self.subscribers.clear();
    }
}

impl<C: Send + Sync + 'static> Default for SubscriptionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
