//! Frame-to-frame message relay.
//!
//! Some UI surfaces (the composer dialog, the on-page dialog) run in
//! sandboxed or cross-origin frames with no access to extension messaging
//! at all. They bridge through a postMessage-style channel to a privileged
//! frame, which forwards traffic onward.
//!
//! See ARCHITECTURE.md Section 5.
//!
//! # Protocol
//!
//! 1. Outbound messages are buffered FIFO while the privileged frame has
//!    not yet signalled readiness.
//! 2. On the `backgroundPageLoaded` sentinel the queue is flushed in order
//!    exactly once, then retired; the relay permanently switches to
//!    direct sends. The transition is never reversed.
//! 3. Requests carry a relay-local message ID; each response removes its
//!    one-time pending entry, so no listener leaks.
//! 4. Hosts can report a send as delivered even though the target frame
//!    never finished loading, so readiness alone is not trusted for
//!    requests that matter: [`FrameRelay::handshake`] re-sends an `init`
//!    probe until the host answers with the explicit acknowledgment value.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::MessageId;
use crate::listener::{Listener, ListenerSet};
use crate::messaging::{CorrelationMap, MessageRouter, Reply, SenderInfo};
use crate::protocol::Envelope;
use crate::transport::Channel;

// ============================================================================
// Constants
// ============================================================================

/// Payload `type` of the re-initialization probe.
pub const INIT_TYPE: &str = "init";

/// Acknowledgment value a host answers the probe with.
///
/// An explicit value, not merely "delivered": it proves the privileged
/// frame is actually processing messages.
pub const INIT_ACK: &str = "initialized";

/// Default number of init probes before giving up.
const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 10;

/// Default pause between init probes.
const DEFAULT_HANDSHAKE_INTERVAL: Duration = Duration::from_millis(100);

/// Default per-probe response deadline.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(250);

// ============================================================================
// HandshakeConfig
// ============================================================================

/// Tuning knobs for the re-initialization handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Probes sent before the handshake fails.
    pub attempts: u32,
    /// Pause between probes.
    pub interval: Duration,
    /// Response deadline per probe.
    pub probe_timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            interval: DEFAULT_HANDSHAKE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

// ============================================================================
// SendMode
// ============================================================================

/// Whether outbound traffic is buffered or sent directly.
///
/// `Queued → Direct` is a one-way transition.
enum SendMode {
    Queued(VecDeque<Value>),
    Direct,
}

// ============================================================================
// FrameRelay
// ============================================================================

/// The sandboxed side of the relay.
pub struct FrameRelay {
    outbound: tokio::sync::mpsc::UnboundedSender<Value>,
    mode: Mutex<SendMode>,
    pending: Mutex<CorrelationMap>,
    next_id: AtomicU64,
}

impl FrameRelay {
    /// Attaches a relay to the window channel toward the privileged frame.
    #[must_use]
    pub fn attach(window: Channel) -> Arc<Self> {
        let Channel { tx, rx } = window;

        let relay = Arc::new(Self {
            outbound: tx,
            mode: Mutex::new(SendMode::Queued(VecDeque::new())),
            pending: Mutex::new(CorrelationMap::default()),
            next_id: AtomicU64::new(1),
        });

        let pump = Arc::clone(&relay);
        tokio::spawn(async move {
            let mut rx = rx;
            while let Some(value) = rx.recv().await {
                pump.handle_inbound(value);
            }
            pump.fail_pending();
        });

        relay
    }

    /// Returns `true` once the readiness sentinel has been seen.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.mode.lock(), SendMode::Direct)
    }

    /// Returns the number of messages waiting for readiness.
    #[inline]
    #[must_use]
    pub fn queued_count(&self) -> usize {
        match &*self.mode.lock() {
            SendMode::Queued(queue) => queue.len(),
            SendMode::Direct => 0,
        }
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends a correlated request and waits for the host's response.
    ///
    /// Queued until readiness, like all relay traffic.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the window channel is gone.
    pub async fn request(&self, payload: Value) -> Result<Value> {
        let (_, rx) = self.register(payload)?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Sends a correlated request with a response deadline.
    ///
    /// On expiry the pending entry is removed; a late response is dropped
    /// as unmatched.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the window channel is gone
    /// - [`Error::RequestTimeout`] if the response misses the deadline
    pub async fn request_with_timeout(
        &self,
        payload: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let (message_id, rx) = self.register(payload)?;

        match timeout(request_timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&message_id);
                Err(Error::request_timeout(
                    message_id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Forwards a persistent-port frame through the relay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the window channel is gone.
    pub fn post_port(&self, name: &str, payload: Value) -> Result<()> {
        self.post_raw(
            Envelope::Port {
                name: name.to_string(),
                payload,
            }
            .to_value(),
        )
    }

    /// Runs the re-initialization handshake.
    ///
    /// Probes until the host answers with [`INIT_ACK`]. Probes that were
    /// only "delivered" (queued into a frame that never came up) time out
    /// and are retried; their stale queue entries get answered after a
    /// late flush and are dropped as unmatched.
    ///
    /// # Errors
    ///
    /// - [`Error::HandshakeFailed`] after the configured attempts
    /// - [`Error::ConnectionClosed`] if the window channel is gone
    pub async fn handshake(&self, config: &HandshakeConfig) -> Result<()> {
        for attempt in 1..=config.attempts {
            let probe = self
                .request_with_timeout(json!({ "type": INIT_TYPE }), config.probe_timeout)
                .await;

            match probe {
                Ok(value) if value == json!(INIT_ACK) => {
                    debug!(attempt, "relay initialized");
                    return Ok(());
                }
                Ok(other) => warn!(?other, "unexpected init acknowledgment"),
                Err(Error::RequestTimeout { .. }) => {
                    trace!(attempt, "init probe unanswered");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(config.interval).await;
        }

        Err(Error::handshake_failed(config.attempts))
    }

    fn register(&self, payload: Value) -> Result<(MessageId, oneshot::Receiver<Value>)> {
        let message_id = MessageId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        self.pending.lock().insert(message_id, tx);

        let wire = Envelope::Request {
            message_id,
            payload,
        }
        .to_value();

        if let Err(e) = self.post_raw(wire) {
            self.pending.lock().remove(&message_id);
            return Err(e);
        }

        Ok((message_id, rx))
    }

    fn post_raw(&self, value: Value) -> Result<()> {
        let mut mode = self.mode.lock();
        match &mut *mode {
            SendMode::Queued(queue) => {
                queue.push_back(value);
                Ok(())
            }
            SendMode::Direct => self
                .outbound
                .send(value)
                .map_err(|_| Error::ConnectionClosed),
        }
    }

    fn handle_inbound(&self, value: Value) {
        match Envelope::from_value(value) {
            Ok(Envelope::Ready) => self.mark_ready(),

            Ok(Envelope::Response {
                message_id,
                payload,
            }) => {
                // One-time listener: removed on match, so it cannot leak.
                let resolver = self.pending.lock().remove(&message_id);
                match resolver {
                    Some(resolver) => {
                        let _ = resolver.send(payload);
                    }
                    None => trace!(%message_id, "response for unknown request"),
                }
            }

            Ok(other) => trace!(kind = %other.kind(), "ignoring inbound frame"),

            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    fn mark_ready(&self) {
        // The flush happens under the mode lock so no direct send can
        // overtake a queued message.
        let mut mode = self.mode.lock();
        match &mut *mode {
            SendMode::Queued(queue) => {
                debug!(count = queue.len(), "frame ready, flushing queue");
                for value in queue.drain(..) {
                    if self.outbound.send(value).is_err() {
                        warn!("host vanished during flush");
                        break;
                    }
                }
                *mode = SendMode::Direct;
            }
            SendMode::Direct => debug!("duplicate readiness sentinel ignored"),
        }
    }

    fn fail_pending(&self) {
        let drained: Vec<_> = {
            let mut pending = self.pending.lock();
            pending.drain().collect()
        };
        if !drained.is_empty() {
            debug!(count = drained.len(), "failed pending relay requests");
        }
    }
}

// ============================================================================
// RelayHost
// ============================================================================

/// The privileged side of the relay.
///
/// Announces readiness when started, acknowledges `init` probes, routes
/// `message` frames through its router, and surfaces relayed port frames
/// to listeners.
pub struct RelayHost {
    router: Arc<MessageRouter>,
    on_port: Arc<ListenerSet<(String, Value)>>,
}

impl RelayHost {
    /// Creates a host with its own router.
    #[must_use]
    pub fn new() -> Self {
        Self::with_router(Arc::new(MessageRouter::new()))
    }

    /// Creates a host serving requests through `router`.
    #[must_use]
    pub fn with_router(router: Arc<MessageRouter>) -> Self {
        router.on(INIT_TYPE, Arc::new(|_, _| Ok(Reply::value(json!(INIT_ACK)))));

        Self {
            router,
            on_port: Arc::new(ListenerSet::new()),
        }
    }

    /// Returns the request router.
    #[must_use]
    pub fn router(&self) -> Arc<MessageRouter> {
        Arc::clone(&self.router)
    }

    /// Registers a listener for relayed port frames `(name, payload)`.
    ///
    /// Register before [`RelayHost::start`] so no frame slips past.
    pub fn on_port(&self, listener: Listener<(String, Value)>) {
        self.on_port.add(listener);
    }

    /// Starts serving the window channel.
    ///
    /// Posts the readiness sentinel first, which makes the relay flush its
    /// queue toward us.
    pub fn start(&self, window: Channel) {
        let Channel { tx, rx } = window;
        let router = Arc::clone(&self.router);
        let on_port = Arc::clone(&self.on_port);

        if tx.send(Envelope::Ready.to_value()).is_err() {
            warn!("relay gone before readiness could be announced");
            return;
        }

        tokio::spawn(async move {
            let mut rx = rx;
            while let Some(value) = rx.recv().await {
                match Envelope::from_value(value) {
                    Ok(Envelope::Request {
                        message_id,
                        payload,
                    }) => {
                        let reply = router.dispatch(&payload, &SenderInfo::default()).await;
                        let envelope = Envelope::Response {
                            message_id,
                            payload: reply,
                        };
                        if tx.send(envelope.to_value()).is_err() {
                            debug!("relay gone before reply could be sent");
                            break;
                        }
                    }

                    Ok(Envelope::Port { name, payload }) => {
                        on_port.emit(&(name, payload));
                    }

                    Ok(other) => trace!(kind = %other.kind(), "ignoring relayed frame"),

                    Err(e) => warn!(error = %e, "dropping malformed frame"),
                }
            }
        });
    }
}

impl Default for RelayHost {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_flushes_in_order_exactly_once() {
        let (relay_end, host_end) = Channel::duplex();
        let relay = FrameRelay::attach(relay_end);

        // Buffered: the host is not up yet.
        relay.post_port("composer", json!({"n": 1})).expect("post");
        relay.post_port("composer", json!({"n": 2})).expect("post");
        assert_eq!(relay.queued_count(), 2);
        assert!(!relay.is_ready());

        let host = RelayHost::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        host.on_port(Arc::new(move |(_, payload): &(String, Value)| {
            seen_clone.lock().push(payload["n"].clone());
        }));
        host.start(host_end);

        // Readiness flushes FIFO, then the queue is retired for good.
        tokio::task::yield_now().await;
        assert!(relay.is_ready());
        assert_eq!(relay.queued_count(), 0);

        // Direct sends after readiness bypass any buffering.
        relay.post_port("composer", json!({"n": 3})).expect("post");
        tokio::task::yield_now().await;

        assert_eq!(*seen.lock(), vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_request_correlation_and_cleanup() {
        let (relay_end, host_end) = Channel::duplex();
        let relay = FrameRelay::attach(relay_end);

        let host = RelayHost::new();
        host.router().on(
            "dialog.get",
            Arc::new(|_, _| Ok(Reply::value(json!({"title": "Block element"})))),
        );
        host.start(host_end);

        let reply = relay
            .request(json!({"type": "dialog.get"}))
            .await
            .expect("reply");

        assert_eq!(reply["title"], "Block element");
        // The one-time response listener is gone.
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_handshake_succeeds_after_late_host() {
        let (relay_end, host_end) = Channel::duplex();
        let relay = FrameRelay::attach(relay_end);

        let config = HandshakeConfig {
            attempts: 50,
            interval: Duration::from_millis(5),
            probe_timeout: Duration::from_millis(10),
        };

        let handshake = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.handshake(&config).await })
        };

        // Let a few probes go unanswered first.
        tokio::time::sleep(Duration::from_millis(30)).await;
        RelayHost::new().start(host_end);

        handshake
            .await
            .expect("join")
            .expect("handshake should succeed");

        // Stale probe entries from the timed-out attempts were answered
        // after the flush and dropped as unmatched.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(relay.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_gives_up_without_host() {
        let (relay_end, _host_end) = Channel::duplex();
        let relay = FrameRelay::attach(relay_end);

        let config = HandshakeConfig {
            attempts: 3,
            ..HandshakeConfig::default()
        };

        let result = relay.handshake(&config).await;
        assert!(matches!(
            result,
            Err(Error::HandshakeFailed { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_duplicate_readiness_is_ignored() {
        let (relay_end, host_end) = Channel::duplex();
        let relay = FrameRelay::attach(relay_end);

        host_end.tx.send(Envelope::Ready.to_value()).expect("send");
        host_end.tx.send(Envelope::Ready.to_value()).expect("send");
        tokio::task::yield_now().await;

        assert!(relay.is_ready());
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_host_drops() {
        let (relay_end, host_end) = Channel::duplex();
        let relay = FrameRelay::attach(relay_end);

        // Readiness, then silence.
        host_end.tx.send(Envelope::Ready.to_value()).expect("send");
        tokio::task::yield_now().await;

        let pending = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move { relay.request(json!({"type": "dialog.get"})).await })
        };
        tokio::task::yield_now().await;

        drop(host_end);

        let result = pending.await.expect("join");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
