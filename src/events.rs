//! Plain observer list used for every notification the core emits.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Callback<T>)>>,
}

/// A list of callbacks invoked synchronously, in subscription order.
pub struct Emitter<T> {
    listeners: Arc<Listeners<T>>,
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Listeners {
                next_id: AtomicU64::new(0),
                entries: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
        T: Send + Sync,
    {
        let id = self.listeners.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut entries) = self.listeners.entries.write() {
            entries.push((id, Arc::new(callback)));
        }

        let weak: Weak<Listeners<T>> = Arc::downgrade(&self.listeners);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(listeners) = weak.upgrade() {
                    if let Ok(mut entries) = listeners.entries.write() {
                        entries.retain(|(entry_id, _)| *entry_id != id);
                    }
                }
            })),
        }
    }

    pub fn emit(&self, value: &T) {
        // Snapshot first so a listener may subscribe/unsubscribe re-entrantly.
        let callbacks: Vec<Callback<T>> = match self.listeners.entries.read() {
            Ok(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            Err(_) => return,
        };
        for callback in callbacks {
            callback(value);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.listeners.entries.write() {
            entries.clear();
        }
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

/// Handle returned by [`Emitter::subscribe`].
///
/// Dropping the handle keeps the listener attached; call
/// [`Subscription::unsubscribe`] to detach it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}
