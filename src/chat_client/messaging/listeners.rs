//! # Listener Registries
//!
//! Typed publish/subscribe for the callbacks the UI layer registers.
//!
//! Every `subscribe` returns a [`Subscription`]; calling
//! [`Subscription::unsubscribe`] or dropping the handle removes exactly that
//! callback, so callers never need to keep the closure around.
//! Callbacks run in registration order.
//!
//! ```rust
//! use medichat::chat_client::messaging::ListenerRegistry;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! let registry = ListenerRegistry::<bool>::new();
//! let hits = Arc::new(AtomicUsize::new(0));
//! let counter = hits.clone();
//! let subscription = registry.subscribe(move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! registry.emit(&true);
//! subscription.unsubscribe();
//! registry.emit(&false);
//! assert_eq!(hits.load(Ordering::SeqCst), 1);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

/// Ordered set of callbacks for one event type
pub struct ListenerRegistry<T> {
    inner: Arc<Mutex<Listeners<T>>>,
}

impl<T> Clone for ListenerRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: 'static> std::fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl<T: 'static> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback; it stays registered until the returned handle
    /// is unsubscribed or dropped
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut listeners = lock(&self.inner);
            let id = listeners.next_id;
            listeners.next_id += 1;
            listeners.entries.push((id, Arc::new(callback)));
            id
        };

        let registry: Weak<Mutex<Listeners<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            detach: Some(Box::new(move || {
                if let Some(inner) = registry.upgrade() {
                    lock(&inner).entries.retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    /// Invoke every registered callback with `value`.
    ///
    /// The list is snapshotted first, so callbacks may subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = lock(&self.inner)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            callback(value);
        }
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<T>(inner: &Mutex<Listeners<T>>) -> MutexGuard<'_, Listeners<T>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle that removes its callback when unsubscribed or dropped
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the callback now
    pub fn unsubscribe(mut self) {
        self.run_detach();
    }

    /// Keep the callback registered for the registry's whole lifetime
    pub fn forget(mut self) {
        self.detach = None;
    }

    fn run_detach(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}
