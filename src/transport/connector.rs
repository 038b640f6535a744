//! The connector seam between contexts.
//!
//! Opening a channel is the one operation no component may perform
//! directly; everything goes through a [`Connector`] owned by the
//! connection manager. That keeps the "at most one port per context per
//! name" invariant enforceable in a single place and lets tests swap the
//! transport without touching any consumer.
//!
//! See ARCHITECTURE.md Section 3.1.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::identifiers::ClientId;

// ============================================================================
// Channel
// ============================================================================

/// One end of a raw bidirectional channel.
///
/// Frames are untyped wire values; parsing into
/// [`Envelope`](crate::protocol::Envelope) happens at the consuming
/// boundary. Disconnection is observed on `rx` ending (the peer dropped
/// its sender) and on `tx` failing (the peer dropped its receiver).
#[derive(Debug)]
pub struct Channel {
    /// Outbound frames toward the peer context.
    pub tx: mpsc::UnboundedSender<Value>,
    /// Inbound frames from the peer context.
    pub rx: mpsc::UnboundedReceiver<Value>,
}

impl Channel {
    /// Creates two channel ends wired to each other.
    ///
    /// The building block of the in-process transport, also handy for
    /// wiring a relay or messenger pair directly in tests.
    #[must_use]
    pub fn duplex() -> (Self, Self) {
        let (left_tx, left_rx) = mpsc::unbounded_channel();
        let (right_tx, right_rx) = mpsc::unbounded_channel();

        (
            Self {
                tx: left_tx,
                rx: right_rx,
            },
            Self {
                tx: right_tx,
                rx: left_rx,
            },
        )
    }
}

// ============================================================================
// Accepted
// ============================================================================

/// A connection the listening side has accepted.
///
/// Carries the channel name the client asked for plus a generated
/// [`ClientId`] so the hub can key per-client state and tests can
/// correlate connections.
#[derive(Debug)]
pub struct Accepted {
    /// Channel purpose, e.g. `ui`.
    pub name: String,
    /// Correlation ID for this client connection.
    pub client_id: ClientId,
    /// The hub-side channel end.
    pub channel: Channel,
}

// ============================================================================
// Connector
// ============================================================================

/// Opens named channels toward the hub context.
///
/// The single seam the connection manager uses; no other component calls
/// the underlying transport directly.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a channel identified by `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) if the hub
    /// side is unreachable.
    async fn open(&self, name: &str) -> Result<Channel>;
}

// ============================================================================
// Tests
// ============================================================================
