//! Connection management for UI contexts.
//!
//! A [`ConnectionManager`] owns the single outbound port of one UI
//! context: it lazily establishes the port, re-establishes it after
//! disconnection with a cooldown delay, and exposes connect, disconnect,
//! and message listener registration.
//!
//! See ARCHITECTURE.md Section 3.2 for the lifecycle.
//!
//! # State Machine
//!
//! ```text
//!              connect() ok
//! disconnected ────────────► connected
//!      ▲                         │
//!      │   port disconnect,      │
//!      └─────────────────────────┘
//!        reconnect after cooldown
//! ```
//!
//! The hub may be an ephemeral worker that is torn down and restarted at
//! any time; reconnecting immediately can falsely succeed against the
//! dying instance, so the reconnect attempt waits out a short cooldown.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::listener::{Listener, ListenerSet};
use crate::port::Port;
use crate::protocol::Envelope;
use crate::transport::{Channel, Connector};

// ============================================================================
// Constants
// ============================================================================

/// Default cooldown before a reconnect attempt.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// ManagerConfig
// ============================================================================

/// Tuning knobs for a connection manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Cooldown between a port disconnect and the reconnect attempt.
    pub reconnect_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Owns one UI context's outbound port.
///
/// Instantiated once per UI context and passed by handle to consumers;
/// no other component opens channels directly.
pub struct ConnectionManager {
    name: String,
    connector: Arc<dyn Connector>,
    config: ManagerConfig,
    port: Mutex<Option<Arc<Port>>>,
    connect_gate: tokio::sync::Mutex<()>,
    reconnect_pending: AtomicBool,
    on_connect: ListenerSet<Arc<Port>>,
    on_disconnect: ListenerSet<()>,
    on_message: ListenerSet<Envelope>,
}

impl ConnectionManager {
    /// Creates a manager for the channel `name` with default config.
    #[must_use]
    pub fn new(name: impl Into<String>, connector: Arc<dyn Connector>) -> Arc<Self> {
        Self::with_config(name, connector, ManagerConfig::default())
    }

    /// Creates a manager with explicit config.
    #[must_use]
    pub fn with_config(
        name: impl Into<String>,
        connector: Arc<dyn Connector>,
        config: ManagerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            connector,
            config,
            port: Mutex::new(None),
            connect_gate: tokio::sync::Mutex::new(()),
            reconnect_pending: AtomicBool::new(false),
            on_connect: ListenerSet::new(),
            on_disconnect: ListenerSet::new(),
            on_message: ListenerSet::new(),
        })
    }

    /// Returns the channel name this manager connects as.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the active port, if connected.
    #[must_use]
    pub fn current_port(&self) -> Option<Arc<Port>> {
        self.port.lock().clone()
    }

    /// Returns `true` while a port is established.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.port.lock().is_some()
    }
}

// ============================================================================
// ConnectionManager - Connecting
// ============================================================================

impl ConnectionManager {
    /// Establishes the port, or returns the existing one.
    ///
    /// Idempotent: while connected this never opens a second channel, and
    /// concurrent callers share a single open attempt. On transport
    /// failure the manager stays disconnected, every disconnect listener
    /// fires, and `None` is returned; no error escapes to subscription
    /// callers.
    pub async fn connect(self: &Arc<Self>) -> Option<Arc<Port>> {
        if let Some(port) = self.current_port() {
            return Some(port);
        }

        let _gate = self.connect_gate.lock().await;

        // A concurrent caller may have connected while we waited.
        if let Some(port) = self.current_port() {
            return Some(port);
        }

        match self.connector.open(&self.name).await {
            Ok(channel) => Some(self.install(channel)),
            Err(e) => {
                warn!(name = %self.name, error = %e, "connect failed");
                self.on_disconnect.emit(&());
                None
            }
        }
    }

    /// Wires a fresh channel into a port and announces the connection.
    fn install(self: &Arc<Self>, channel: Channel) -> Arc<Port> {
        let Channel { tx, rx } = channel;
        let port = Port::new(self.name.clone(), tx);

        // Only subscribed-event envelopes fan out to the manager's message
        // listeners; request/response correlation is the messenger's job.
        let manager = Arc::downgrade(self);
        port.add_message_listener(Arc::new(move |envelope: &Envelope| {
            if !envelope.is_event() {
                return;
            }
            if let Some(manager) = manager.upgrade() {
                manager.on_message.emit(envelope);
            }
        }));

        let manager = Arc::downgrade(self);
        port.add_disconnect_listener(Arc::new(move |()| {
            if let Some(manager) = manager.upgrade() {
                manager.handle_disconnect();
            }
        }));

        port.start(rx);

        *self.port.lock() = Some(Arc::clone(&port));
        debug!(name = %self.name, "connected");

        self.on_connect.emit(&port);
        port
    }

    /// Handles loss of the active port.
    ///
    /// Fires disconnect listeners, then schedules exactly one reconnect
    /// attempt after the cooldown.
    fn handle_disconnect(self: Arc<Self>) {
        *self.port.lock() = None;
        debug!(name = %self.name, "disconnected");
        self.on_disconnect.emit(&());

        if self.reconnect_pending.swap(true, Ordering::SeqCst) {
            return;
        }

        let delay = self.config.reconnect_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            self.reconnect_pending.store(false, Ordering::SeqCst);
            let _ = self.connect().await;
        });
    }
}

// ============================================================================
// ConnectionManager - Listeners
// ============================================================================

impl ConnectionManager {
    /// Registers a connect listener.
    ///
    /// If a port is currently established the listener also fires
    /// immediately: the post-condition is "has fired at least once while
    /// connected", however late the registration happens.
    pub fn add_connect_listener(&self, listener: Listener<Arc<Port>>) {
        self.on_connect.add(Arc::clone(&listener));
        if let Some(port) = self.current_port() {
            listener(&port);
        }
    }

    /// Removes a connect listener by identity.
    pub fn remove_connect_listener(&self, listener: &Listener<Arc<Port>>) {
        self.on_connect.remove(listener);
    }

    /// Registers a disconnect listener.
    pub fn add_disconnect_listener(&self, listener: Listener<()>) {
        self.on_disconnect.add(listener);
    }

    /// Removes a disconnect listener by identity.
    pub fn remove_disconnect_listener(&self, listener: &Listener<()>) {
        self.on_disconnect.remove(listener);
    }

    /// Registers a listener for subscribed-event envelopes.
    pub fn add_message_listener(&self, listener: Listener<Envelope>) {
        self.on_message.add(listener);
    }

    /// Removes a message listener by identity.
    pub fn remove_message_listener(&self, listener: &Listener<Envelope>) {
        self.on_message.remove(listener);
    }
}

// ============================================================================
// Tests
// ============================================================================
