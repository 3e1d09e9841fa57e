//! Throttled change notification
//!
//! The first change outside the throttle window notifies right away; changes
//! inside the window collapse into one trailing notification when it ends.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Zero-argument change listener
pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
struct Window {
    last_notified: Option<Instant>,
    trailing_scheduled: bool,
}

pub struct Notifier {
    listeners: Mutex<Vec<(Uuid, Listener)>>,
    throttle: Duration,
    window: Mutex<Window>,
}

/// Handle returned by [`Notifier::add`]
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: Uuid,
    notifier: Weak<Notifier>,
}

impl ListenerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Remove the listener. Does nothing if it is already gone.
    pub fn unsubscribe(&self) {
        if let Some(notifier) = self.notifier.upgrade() {
            notifier.remove(self.id);
        }
    }
}

impl Notifier {
    pub fn new(throttle: Duration) -> Arc<Self> {
        Arc::new(Self {
            listeners: Mutex::new(Vec::new()),
            throttle,
            window: Mutex::new(Window::default()),
        })
    }

    pub fn add(self: &Arc<Self>, listener: Listener) -> ListenerHandle {
        let id = Uuid::new_v4();
        self.lock_listeners().push((id, listener));
        tracing::debug!(listener_id = %id, "Listener registered");

        ListenerHandle {
            id,
            notifier: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: Uuid) {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(entry, _)| *entry != id);
        if listeners.len() != before {
            tracing::debug!(listener_id = %id, "Listener removed");
        }
    }

    pub fn clear(&self) {
        self.lock_listeners().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_listeners().is_empty()
    }

    /// Signal a change
    pub fn notify(self: &Arc<Self>) {
        let now = Instant::now();
        let delay = {
            let mut window = self.lock_window();
            match window.last_notified {
                Some(last) if now.duration_since(last) < self.throttle => {
                    if window.trailing_scheduled {
                        return;
                    }
                    window.trailing_scheduled = true;
                    Some(self.throttle - now.duration_since(last))
                }
                _ => {
                    window.last_notified = Some(now);
                    None
                }
            }
        };

        match delay {
            None => self.dispatch(),
            Some(delay) => self.schedule_trailing(delay),
        }
    }

    fn schedule_trailing(self: &Arc<Self>, delay: Duration) {
        let notifier = Arc::downgrade(self);
        let spawned = tokio::runtime::Handle::try_current().map(|runtime| {
            runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(notifier) = notifier.upgrade() {
                    notifier.flush_trailing();
                }
            })
        });

        if spawned.is_err() {
            // Outside a runtime there is nothing to defer to.
            self.flush_trailing();
        }
    }

    fn flush_trailing(&self) {
        {
            let mut window = self.lock_window();
            window.trailing_scheduled = false;
            window.last_notified = Some(Instant::now());
        }
        self.dispatch();
    }

    /// Call every listener in registration order, isolating panics
    fn dispatch(&self) {
        let listeners: Vec<(Uuid, Listener)> = self
            .lock_listeners()
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();

        for (id, listener) in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener())).is_err() {
                tracing::warn!(listener_id = %id, "Listener panicked");
            }
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<(Uuid, Listener)>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_window(&self) -> MutexGuard<'_, Window> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
