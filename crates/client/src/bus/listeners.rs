//! Listener registry with drop-to-deregister guards.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::error;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback<T>,
}

struct Registry<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

trait Deregister: Send + Sync {
    fn deregister(&self, id: u64);
}

impl<T: 'static> Deregister for Mutex<Registry<T>> {
    fn deregister(&self, id: u64) {
        let mut registry = self.lock().unwrap_or_else(PoisonError::into_inner);
        registry.entries.retain(|entry| entry.id != id);
    }
}

/// A set of callbacks invoked with every emitted value.
pub struct Listeners<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: 'static> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T: 'static> Listeners<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It stays registered until the guard is dropped.
    #[must_use = "dropping the guard deregisters the listener immediately"]
    pub fn register<F>(&self, callback: F) -> ListenerGuard
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push(Entry {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });
            id
        };
        let registry: Arc<dyn Deregister> = self.registry.clone();
        ListenerGuard {
            id,
            active,
            registry: Arc::downgrade(&registry),
        }
    }

    /// Invoke every registered callback with `value`.
    ///
    /// Callbacks run outside the registry lock, so they may register or drop
    /// listeners themselves. A panicking callback is logged and skipped.
    /// Returns how many callbacks ran.
    pub fn emit(&self, value: &T) -> usize {
        let snapshot: Vec<(Arc<AtomicBool>, Callback<T>)> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .entries
                .iter()
                .map(|entry| (Arc::clone(&entry.active), Arc::clone(&entry.callback)))
                .collect()
        };

        let mut delivered = 0;
        for (active, callback) in snapshot {
            // deregistered after the snapshot was taken
            if !active.load(Ordering::Acquire) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
                error!("Listener panicked; continuing with remaining listeners");
            }
            delivered += 1;
        }
        delivered
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a listener registered. Dropping it deregisters synchronously.
pub struct ListenerGuard {
    id: u64,
    active: Arc<AtomicBool>,
    registry: Weak<dyn Deregister>,
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard").field("id", &self.id).finish()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counter(listeners: &Listeners<u32>) -> (ListenerGuard, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let guard = listeners.register(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (guard, hits)
    }

    #[test]
    fn test_emit_reaches_every_listener() {
        let listeners = Listeners::new();
        let (_a, hits_a) = counter(&listeners);
        let (_b, hits_b) = counter(&listeners);
        assert_eq!(listeners.emit(&1), 2);
        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_deregisters() {
        let listeners = Listeners::new();
        let (guard, hits) = counter(&listeners);
        drop(guard);
        assert!(listeners.is_empty());
        assert_eq!(listeners.emit(&1), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let listeners = Listeners::new();
        let _bad = listeners.register(|_: &u32| panic!("view blew up"));
        let (_good, hits) = counter(&listeners);
        listeners.emit(&1);
        listeners.emit(&2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_guard_outliving_registry() {
        let listeners = Listeners::<u32>::new();
        let (guard, _) = counter(&listeners);
        drop(listeners);
        drop(guard);
    }
}
