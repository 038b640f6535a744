//! Background-internal event emitter.
//!
//! The simplest possible pub/sub: it decouples the filtering engine's
//! change notifications from the per-client fan-out in the hub. No
//! prioritization, no once-only semantics, no backpressure; listeners run
//! synchronously in registration order.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

// ============================================================================
// EventListener
// ============================================================================

/// A callback invoked with an event's arguments.
pub type EventListener = Arc<dyn Fn(&[Value]) + Send + Sync>;

// ============================================================================
// EventEmitter
// ============================================================================

/// Process-wide pub/sub keyed by event name.
#[derive(Default)]
pub struct EventEmitter {
    listeners: Mutex<FxHashMap<String, Vec<EventListener>>>,
}

impl EventEmitter {
    /// Creates an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `name`.
    pub fn on(&self, name: impl Into<String>, listener: EventListener) {
        self.listeners
            .lock()
            .entry(name.into())
            .or_default()
            .push(listener);
    }

    /// Removes a listener by identity.
    ///
    /// A no-op if the listener is not registered; never fails.
    pub fn off(&self, name: &str, listener: &EventListener) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(name) {
            if let Some(index) = entries.iter().position(|entry| Arc::ptr_eq(entry, listener)) {
                entries.remove(index);
            }
            if entries.is_empty() {
                listeners.remove(name);
            }
        }
    }

    /// Invokes every listener for `name` in registration order.
    pub fn emit(&self, name: &str, args: &[Value]) {
        let snapshot: Vec<_> = self
            .listeners
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_default();

        for listener in snapshot {
            listener(args);
        }
    }

    /// Returns the number of listeners for `name`.
    #[inline]
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.lock().get(name).map_or(0, Vec::len)
    }

    /// Returns `true` if any listener is registered for `name`.
    #[inline]
    #[must_use]
    pub fn has_listeners(&self, name: &str) -> bool {
        self.listener_count(name) > 0
    }
}

// ============================================================================
// Tests
// ============================================================================
