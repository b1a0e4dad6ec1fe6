//! Listener registry
//!
//! Ordered observer fan-out shared by the protocol, transports and jobs.
//!
//! Registrations are non-owning: the registry keeps a `Weak` reference, so a
//! transport or job never keeps the protocol that listens to it alive.
//! Listener identity is the address of the shared allocation, which makes
//! `register`/`unregister` idempotent.
//!
//! Handlers are trait methods with empty default bodies; `notify` takes a
//! closure that calls the handler for one listener.

use parking_lot::RwLock;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

/// Ordered, identity-keyed set of non-owning listener registrations
pub struct ListenerRegistry<L: ?Sized> {
    listeners: RwLock<Vec<Weak<L>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register a listener.
    ///
    /// Returns `false` if the listener was already registered; its original
    /// position is kept.
    pub fn register(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        listeners.retain(|weak| weak.strong_count() > 0);
        if listeners.iter().any(|weak| same_listener(weak, listener)) {
            return false;
        }
        listeners.push(Arc::downgrade(listener));
        true
    }

    /// Unregister a listener.
    ///
    /// Returns `false` if the listener was not registered.
    pub fn unregister(&self, listener: &Arc<L>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|weak| weak.strong_count() > 0 && !same_listener(weak, listener));
        listeners.len() != before
    }

    /// Check whether a listener is registered
    pub fn contains(&self, listener: &Arc<L>) -> bool {
        self.listeners
            .read()
            .iter()
            .any(|weak| weak.strong_count() > 0 && same_listener(weak, listener))
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether no live listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every registration
    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Live listeners in registration order
    pub fn snapshot(&self) -> Vec<Arc<L>> {
        let mut listeners = self.listeners.write();
        listeners.retain(|weak| weak.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    /// Invoke `handler` for every registered listener, in registration order,
    /// on the calling thread.
    ///
    /// The registry lock is not held while handlers run, so a handler may
    /// register or unregister listeners. A panicking handler is logged and
    /// the remaining listeners are still notified.
    pub fn notify<F>(&self, event: &str, handler: F)
    where
        F: Fn(&L),
    {
        for listener in self.snapshot() {
            let result = panic::catch_unwind(AssertUnwindSafe(|| handler(&listener)));
            if result.is_err() {
                tracing::error!("Listener panicked while handling {}", event);
            }
        }
    }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> std::fmt::Debug for ListenerRegistry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

fn same_listener<L: ?Sized>(weak: &Weak<L>, listener: &Arc<L>) -> bool {
    std::ptr::addr_eq(weak.as_ptr(), Arc::as_ptr(listener))
}
