//! Identity-deduplicated callback sets.
//!
//! Ports and connection managers each keep disjoint collections of connect,
//! disconnect, and message callbacks. Registration order is irrelevant and
//! registering the same callback twice is a no-op, so the collections are
//! sets keyed by callback identity (`Arc` pointer equality).

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;

// ============================================================================
// Listener
// ============================================================================

/// A shared callback invoked with a borrowed argument.
///
/// Identity (the `Arc` allocation) doubles as the deduplication and
/// removal key, mirroring how callback registration works in the host
/// browser's event targets.
pub type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

// ============================================================================
// ListenerSet
// ============================================================================

/// A set of callbacks, deduplicated by identity.
///
/// `emit` snapshots the set before invoking, so listeners may add or
/// remove listeners (including themselves) during dispatch.
pub struct ListenerSet<A> {
    entries: Mutex<Vec<Listener<A>>>,
}

impl<A> ListenerSet<A> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Adds a listener.
    ///
    /// Returns `false` if this exact callback is already registered.
    pub fn add(&self, listener: Listener<A>) -> bool {
        let mut entries = self.entries.lock();
        if entries.iter().any(|entry| Arc::ptr_eq(entry, &listener)) {
            return false;
        }
        entries.push(listener);
        true
    }

    /// Removes a listener by identity.
    ///
    /// Returns `false` if the callback was not registered.
    pub fn remove(&self, listener: &Listener<A>) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| !Arc::ptr_eq(entry, listener));
        entries.len() != before
    }

    /// Invokes every registered listener with `argument`.
    pub fn emit(&self, argument: &A) {
        let snapshot: Vec<_> = self.entries.lock().clone();
        for listener in snapshot {
            listener(argument);
        }
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no listeners are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<A> Default for ListenerSet<A> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
