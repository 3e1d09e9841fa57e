//! Callback fan-out
//!
//! Registration-ordered sets of callbacks used by feed implementations to
//! deliver values to their subscribers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::types::{AppStateSnapshot, RawFeedSample};

/// Callback invoked with each delivered value
pub type Callback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Handle returned by every `subscribe_*` call
///
/// Calling [`Subscription::unsubscribe`] removes the callback. Dropping the
/// handle without calling it leaves the callback registered.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to remove
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

type Entries<T> = Vec<(Uuid, Callback<T>)>;

/// A set of callbacks for one value stream
pub struct ListenerSet<T> {
    entries: Arc<Mutex<Entries<T>>>,
}

impl<T> Clone for ListenerSet<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + 'static> ListenerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub fn add(&self, callback: Callback<T>) -> Subscription {
        let id = Uuid::new_v4();
        self.lock().push((id, callback));

        let entries = Arc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Deliver a value to every callback in registration order.
    ///
    /// The set is snapshotted first, so callbacks may subscribe or
    /// unsubscribe while being invoked.
    pub fn emit(&self, value: T) {
        let callbacks: Vec<Callback<T>> = self.lock().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for callback in callbacks {
            callback(value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Entries<T>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The five callback streams every feed exposes
#[derive(Clone, Default)]
pub struct FeedListeners {
    pub connection: ListenerSet<bool>,
    pub history_sum: ListenerSet<f64>,
    pub history_array: ListenerSet<Vec<RawFeedSample>>,
    pub realtime: ListenerSet<f64>,
    pub app_state: ListenerSet<AppStateSnapshot>,
}
