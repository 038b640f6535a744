//! Named, long-lived, bidirectional ports.
//!
//! A [`Port`] wraps one transport channel and exposes the three things a
//! UI context needs from it: sending envelopes, message listeners, and
//! disconnect notification. Ports are created only by the connection
//! manager; the hub holds a logically symmetric channel end per client but
//! never a `Port`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::listener::{Listener, ListenerSet};
use crate::protocol::Envelope;

// ============================================================================
// Port
// ============================================================================

/// One logical bidirectional channel, identified by name.
///
/// Exists until the underlying transport reports disconnection; it is
/// never reused; reconnection produces a fresh `Port`.
pub struct Port {
    name: String,
    sink: Mutex<Option<mpsc::UnboundedSender<Value>>>,
    on_message: ListenerSet<Envelope>,
    on_disconnect: ListenerSet<()>,
}

impl Port {
    /// Creates a port over an outbound sink.
    ///
    /// The inbound half is attached separately with [`Port::start`], after
    /// the owner has registered its listeners, so no early frame can slip
    /// past them.
    pub(crate) fn new(name: impl Into<String>, sink: mpsc::UnboundedSender<Value>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            sink: Mutex::new(Some(sink)),
            on_message: ListenerSet::new(),
            on_disconnect: ListenerSet::new(),
        })
    }

    /// Starts the inbound pump.
    ///
    /// Parses each frame at the trust boundary and fans valid envelopes
    /// out to the message listeners. When the stream ends the disconnect
    /// listeners fire exactly once.
    pub(crate) fn start(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<Value>) {
        let port = Arc::clone(self);

        tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                match Envelope::from_value(value) {
                    Ok(envelope) => port.on_message.emit(&envelope),
                    Err(e) => warn!(port = %port.name, error = %e, "dropping malformed frame"),
                }
            }

            debug!(port = %port.name, "port disconnected");
            port.on_disconnect.emit(&());
        });
    }

    /// Returns the channel name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` while the transport can still accept frames.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.sink
            .lock()
            .as_ref()
            .is_some_and(|sink| !sink.is_closed())
    }

    /// Sends one envelope to the peer context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the transport is gone.
    pub fn post(&self, envelope: &Envelope) -> Result<()> {
        let sink = self.sink.lock();
        let Some(sink) = sink.as_ref() else {
            return Err(Error::ConnectionClosed);
        };
        sink.send(envelope.to_value())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Closes the client side of the channel.
    ///
    /// The peer observes its inbound stream ending; the disconnect
    /// listeners here fire once the peer tears its side down. A page being
    /// torn down gets the same effect implicitly.
    pub fn disconnect(&self) {
        if self.sink.lock().take().is_some() {
            debug!(port = %self.name, "client closed the port");
        }
    }

    /// Registers a message listener; duplicate registrations are ignored.
    pub fn add_message_listener(&self, listener: Listener<Envelope>) {
        self.on_message.add(listener);
    }

    /// Removes a message listener by identity.
    pub fn remove_message_listener(&self, listener: &Listener<Envelope>) {
        self.on_message.remove(listener);
    }

    /// Registers a disconnect listener; duplicate registrations are ignored.
    pub fn add_disconnect_listener(&self, listener: Listener<()>) {
        self.on_disconnect.add(listener);
    }

    /// Removes a disconnect listener by identity.
    pub fn remove_disconnect_listener(&self, listener: &Listener<()>) {
        self.on_disconnect.remove(listener);
    }
}

// ============================================================================
// Tests
// ============================================================================
