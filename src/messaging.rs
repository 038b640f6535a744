//! One-shot request/response messaging.
//!
//! Command/response exchanges ride the extension's generic messaging
//! primitive, not the persistent port: they must work before any port is
//! established and carry their own correlation. A [`Messenger`] is one
//! endpoint of that primitive: it can send correlated requests and answer
//! the peer's requests through a [`MessageRouter`], full duplex.
//!
//! See ARCHITECTURE.md Section 3.3.
//!
//! # Reply Semantics
//!
//! Every registered handler for a payload's `type` is invoked, in
//! registration order. Only the first produced reply (immediate value or
//! deferred future) is wired to the response; a failing handler is logged,
//! claims nothing, and never aborts dispatch for the remaining handlers.
//! In practice a single responder per type is expected.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{ClientId, MessageId, TabId};
use crate::protocol::{Envelope, EngineCommand};
use crate::transport::{Channel, Connector};

// ============================================================================
// Types
// ============================================================================

/// Map of message IDs to response resolvers.
pub(crate) type CorrelationMap = FxHashMap<MessageId, oneshot::Sender<Value>>;

/// Reserved channel name of the one-shot messaging primitive.
///
/// The hub attaches connections with this name as messenger endpoints
/// instead of subscription ports.
pub const MESSAGING_CHANNEL: &str = "messaging";

// ============================================================================
// SenderInfo
// ============================================================================

/// Who a dispatched request came from.
///
/// Populated by the hub for client-attached endpoints; default (all
/// `None`) for anonymous peers such as test fixtures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderInfo {
    /// The connected client, if known.
    pub client_id: Option<ClientId>,
    /// The tab the sender lives in, if any.
    pub tab_id: Option<TabId>,
}

// ============================================================================
// Reply
// ============================================================================

/// Outcome of one request handler.
pub enum Reply {
    /// The handler does not handle this request.
    Ignored,

    /// Reply immediately with a value.
    Value(Value),

    /// Reply once the future settles; a rejection is logged and answered
    /// with `null`.
    Deferred(BoxFuture<'static, Result<Value>>),
}

impl Reply {
    /// Creates an immediate reply.
    #[inline]
    #[must_use]
    pub fn value(value: Value) -> Self {
        Self::Value(value)
    }

    /// Creates a deferred reply from a future.
    #[must_use]
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }
}

/// A request handler: `(payload, sender)` to a [`Reply`].
///
/// Returning `Err` means the handler itself failed; the error is logged
/// and dispatch continues with the remaining handlers.
pub type RequestHandler = Arc<dyn Fn(&Value, &SenderInfo) -> Result<Reply> + Send + Sync>;

// ============================================================================
// MessageRouter
// ============================================================================

/// Dispatches inbound request payloads to registered handlers by `type`.
#[derive(Default)]
pub struct MessageRouter {
    handlers: Mutex<FxHashMap<String, Vec<RequestHandler>>>,
}

impl MessageRouter {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for payloads whose `type` equals `kind`.
    ///
    /// Multiple handlers per type are supported; all are invoked.
    pub fn on(&self, kind: impl Into<String>, handler: RequestHandler) {
        self.handlers.lock().entry(kind.into()).or_default().push(handler);
    }

    /// Dispatches a request payload and produces the reply value.
    ///
    /// Unknown payload types reply `null`, as does the absence of any
    /// responding handler.
    pub async fn dispatch(&self, payload: &Value, sender: &SenderInfo) -> Value {
        let Some(kind) = payload.get("type").and_then(Value::as_str) else {
            warn!("request payload missing `type`");
            return Value::Null;
        };

        let handlers = self.handlers_for(kind);
        if handlers.is_empty() {
            debug!(kind, "no handler for request");
            return Value::Null;
        }

        let mut winner: Option<Reply> = None;
        for handler in handlers {
            match handler(payload, sender) {
                Ok(Reply::Ignored) => {}
                Ok(reply) => {
                    if winner.is_none() {
                        winner = Some(reply);
                    }
                }
                Err(e) => warn!(kind, error = %e, "request handler failed"),
            }
        }

        match winner {
            None | Some(Reply::Ignored) => Value::Null,
            Some(Reply::Value(value)) => value,
            Some(Reply::Deferred(future)) => future.await.unwrap_or_else(|e| {
                warn!(kind, error = %e, "deferred reply failed");
                Value::Null
            }),
        }
    }

    /// Dispatches a request that has no response channel.
    ///
    /// Handlers run for their side effects; immediate replies are
    /// discarded and deferred replies are dropped unpolled.
    pub fn dispatch_no_reply(&self, payload: &Value, sender: &SenderInfo) {
        let Some(kind) = payload.get("type").and_then(Value::as_str) else {
            warn!("request payload missing `type`");
            return;
        };

        for handler in self.handlers_for(kind) {
            if let Err(e) = handler(payload, sender) {
                warn!(kind, error = %e, "request handler failed");
            }
        }
    }

    fn handlers_for(&self, kind: &str) -> Vec<RequestHandler> {
        self.handlers.lock().get(kind).cloned().unwrap_or_default()
    }
}

// ============================================================================
// RequestSender
// ============================================================================

/// Sends correlated one-shot requests.
pub struct RequestSender {
    outbound: mpsc::UnboundedSender<Value>,
    pending: Arc<Mutex<CorrelationMap>>,
    next_id: AtomicU64,
}

impl RequestSender {
    fn new(outbound: mpsc::UnboundedSender<Value>, pending: Arc<Mutex<CorrelationMap>>) -> Self {
        Self {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
        }
    }

    /// Sends a request and waits for the correlated response.
    ///
    /// No deadline is enforced; a caller that stops caring can simply drop
    /// the future. Use [`RequestSender::send_with_timeout`] for bounded
    /// waits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if the channel is gone, now or
    /// before the response arrives.
    pub async fn send(&self, payload: Value) -> Result<Value> {
        let (_, rx) = self.transmit(payload)?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Sends a request with a response deadline.
    ///
    /// On expiry the pending entry is removed, so a late response is
    /// dropped as unmatched rather than retained forever.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the channel is gone
    /// - [`Error::RequestTimeout`] if the response misses the deadline
    pub async fn send_with_timeout(
        &self,
        payload: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let (message_id, rx) = self.transmit(payload)?;

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

    /// Sends a typed engine command.
    ///
    /// # Errors
    ///
    /// Same as [`RequestSender::send`].
    pub async fn send_command(&self, command: &EngineCommand) -> Result<Value> {
        self.send(command.to_payload()).await
    }

    /// Returns the number of requests awaiting a response.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn transmit(&self, payload: Value) -> Result<(MessageId, oneshot::Receiver<Value>)> {
        let message_id = MessageId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();

        self.pending.lock().insert(message_id, tx);

        let envelope = Envelope::Request {
            message_id,
            payload,
        };

        if self.outbound.send(envelope.to_value()).is_err() {
            self.pending.lock().remove(&message_id);
            return Err(Error::ConnectionClosed);
        }

        trace!(%message_id, "request sent");
        Ok((message_id, rx))
    }
}

// ============================================================================
// Messenger
// ============================================================================

/// One endpoint of the one-shot messaging primitive.
///
/// Owns the channel's pump task: inbound responses resolve pending
/// requests, inbound requests are dispatched through the router and
/// answered on the same channel.
pub struct Messenger {
    sender: RequestSender,
    router: Arc<MessageRouter>,
}

impl Messenger {
    /// Attaches an endpoint with its own router and anonymous peer info.
    #[must_use]
    pub fn attach(channel: Channel) -> Self {
        Self::attach_with(channel, Arc::new(MessageRouter::new()), SenderInfo::default())
    }

    /// Opens the one-shot channel through a connector and attaches to it.
    ///
    /// Works before (and independently of) any persistent port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the hub side is unreachable.
    pub async fn connect(connector: &dyn Connector) -> Result<Self> {
        let channel = connector.open(MESSAGING_CHANNEL).await?;
        Ok(Self::attach(channel))
    }

    /// Attaches an endpoint sharing `router`, attributing inbound requests
    /// to `peer`.
    ///
    /// The hub uses this to serve many clients through one router.
    #[must_use]
    pub fn attach_with(channel: Channel, router: Arc<MessageRouter>, peer: SenderInfo) -> Self {
        let Channel { tx, rx } = channel;
        let pending = Arc::new(Mutex::new(CorrelationMap::default()));
        let sender = RequestSender::new(tx.clone(), Arc::clone(&pending));

        tokio::spawn(pump(rx, tx, pending, Arc::clone(&router), peer));

        Self { sender, router }
    }

    /// Returns the request sender.
    #[inline]
    #[must_use]
    pub fn sender(&self) -> &RequestSender {
        &self.sender
    }

    /// Returns the router serving the peer's requests.
    #[inline]
    #[must_use]
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Sends a request and waits for the correlated response.
    ///
    /// # Errors
    ///
    /// See [`RequestSender::send`].
    pub async fn send(&self, payload: Value) -> Result<Value> {
        self.sender.send(payload).await
    }

    /// Sends a request with a response deadline.
    ///
    /// # Errors
    ///
    /// See [`RequestSender::send_with_timeout`].
    pub async fn send_with_timeout(
        &self,
        payload: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        self.sender.send_with_timeout(payload, request_timeout).await
    }

    /// Sends a typed engine command.
    ///
    /// # Errors
    ///
    /// See [`RequestSender::send`].
    pub async fn send_command(&self, command: &EngineCommand) -> Result<Value> {
        self.sender.send_command(command).await
    }

    /// Registers a request handler on this endpoint's router.
    pub fn on(&self, kind: impl Into<String>, handler: RequestHandler) {
        self.router.on(kind, handler);
    }
}

// ============================================================================
// Pump
// ============================================================================

/// Drives one endpoint until its channel closes.
async fn pump(
    mut rx: mpsc::UnboundedReceiver<Value>,
    tx: mpsc::UnboundedSender<Value>,
    pending: Arc<Mutex<CorrelationMap>>,
    router: Arc<MessageRouter>,
    peer: SenderInfo,
) {
    while let Some(value) = rx.recv().await {
        match Envelope::from_value(value) {
            Ok(Envelope::Response {
                message_id,
                payload,
            }) => {
                let resolver = pending.lock().remove(&message_id);
                match resolver {
                    Some(resolver) => {
                        // The caller may have dropped its future; that is fine.
                        let _ = resolver.send(payload);
                    }
                    // Teardown races make unmatched responses expected.
                    None => trace!(%message_id, "response for unknown request"),
                }
            }

            Ok(Envelope::Request {
                message_id,
                payload,
            }) => {
                let reply = router.dispatch(&payload, &peer).await;
                let envelope = Envelope::Response {
                    message_id,
                    payload: reply,
                };
                if tx.send(envelope.to_value()).is_err() {
                    debug!("peer gone before reply could be sent");
                    break;
                }
            }

            Ok(other) => debug!(kind = %other.kind(), "ignoring envelope on one-shot channel"),

            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
    }

    // Fail every pending request on teardown; dropping the resolvers makes
    // the awaiting futures observe ConnectionClosed.
    let drained: Vec<_> = {
        let mut pending = pending.lock();
        pending.drain().collect()
    };
    if !drained.is_empty() {
        debug!(count = drained.len(), "failed pending requests on shutdown");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    /// A messenger wired to a raw peer channel the test drives by hand.
    fn endpoint() -> (Messenger, Channel) {
        let (near, far) = Channel::duplex();
        (Messenger::attach(near), far)
    }

    /// Two fully attached endpoints.
    fn endpoints() -> (Messenger, Messenger) {
        let (near, far) = Channel::duplex();
        (Messenger::attach(near), Messenger::attach(far))
    }

    #[tokio::test]
    async fn test_out_of_order_responses_are_not_cross_wired() {
        let (messenger, mut far) = endpoint();

        let first = messenger.send(json!({"type": "app.get", "what": "platform"}));
        let second = messenger.send(json!({"type": "app.get", "what": "addonVersion"}));

        let replier = async {
            let a = Envelope::from_value(far.rx.recv().await.expect("first request"))
                .expect("parse");
            let b = Envelope::from_value(far.rx.recv().await.expect("second request"))
                .expect("parse");

            let (Envelope::Request { message_id: id_a, .. },
                 Envelope::Request { message_id: id_b, .. }) = (a, b)
            else {
                panic!("expected two requests");
            };

            // Answer in reverse order.
            far.tx
                .send(
                    Envelope::Response {
                        message_id: id_b,
                        payload: json!("1.2.3"),
                    }
                    .to_value(),
                )
                .expect("send");
            far.tx
                .send(
                    Envelope::Response {
                        message_id: id_a,
                        payload: json!("firefox"),
                    }
                    .to_value(),
                )
                .expect("send");
        };

        let (first, second, ()) = tokio::join!(first, second, replier);
        assert_eq!(first.expect("first"), json!("firefox"));
        assert_eq!(second.expect("second"), json!("1.2.3"));
    }

    #[tokio::test]
    async fn test_failing_handler_does_not_block_the_next() {
        let (client, server) = endpoints();

        server.on(
            "filters.importRaw",
            Arc::new(|_, _| Err(Error::protocol("parser exploded"))),
        );
        server.on(
            "filters.importRaw",
            Arc::new(|_, _| Ok(Reply::value(json!([])))),
        );

        let reply = client
            .send(json!({"type": "filters.importRaw", "text": "||ads.example^"}))
            .await
            .expect("reply");

        // The failing handler never claims the reply slot.
        assert_eq!(reply, json!([]));
    }

    #[tokio::test]
    async fn test_first_reply_wins() {
        let (client, server) = endpoints();

        server.on("app.get", Arc::new(|_, _| Ok(Reply::value(json!("first")))));
        server.on("app.get", Arc::new(|_, _| Ok(Reply::value(json!("second")))));

        let reply = client
            .send(json!({"type": "app.get", "what": "platform"}))
            .await
            .expect("reply");

        assert_eq!(reply, json!("first"));
    }

    #[tokio::test]
    async fn test_deferred_reply() {
        let (client, server) = endpoints();

        server.on(
            "subscriptions.get",
            Arc::new(|_, _| {
                Ok(Reply::deferred(async {
                    Ok(json!([{ "url": "https://lists.example/easylist.txt" }]))
                }))
            }),
        );

        let reply = client
            .send(json!({"type": "subscriptions.get", "ignoreDisabled": true}))
            .await
            .expect("reply");

        assert_eq!(reply[0]["url"], "https://lists.example/easylist.txt");
    }

    #[tokio::test]
    async fn test_rejected_deferred_reply_is_null() {
        let (client, server) = endpoints();

        server.on(
            "prefs.get",
            Arc::new(|_, _| {
                Ok(Reply::deferred(async {
                    Err(Error::protocol("storage gone"))
                }))
            }),
        );

        let reply = client
            .send(json!({"type": "prefs.get", "key": "notifications"}))
            .await
            .expect("reply");

        assert_eq!(reply, Value::Null);
    }

    #[tokio::test]
    async fn test_unhandled_request_replies_null() {
        let (client, _server) = endpoints();

        let reply = client
            .send(json!({"type": "composer.openDialog"}))
            .await
            .expect("reply");

        assert_eq!(reply, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_with_timeout_expires_and_cleans_up() {
        let (messenger, _far) = endpoint();

        let result = messenger
            .send_with_timeout(
                json!({"type": "app.get", "what": "platform"}),
                Duration::from_millis(250),
            )
            .await;

        assert!(matches!(result, Err(Error::RequestTimeout { .. })));
        assert_eq!(messenger.sender().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_response_is_dropped_silently() {
        let (messenger, mut far) = endpoint();

        // A response nobody asked for.
        far.tx
            .send(
                Envelope::Response {
                    message_id: MessageId::new(777),
                    payload: json!("stray"),
                }
                .to_value(),
            )
            .expect("send");

        // The endpoint keeps working afterwards.
        let pending = messenger.send(json!({"type": "app.get", "what": "platform"}));

        let request = far.rx.recv().await.expect("request");
        let Ok(Envelope::Request { message_id, .. }) = Envelope::from_value(request) else {
            panic!("expected a request");
        };
        far.tx
            .send(
                Envelope::Response {
                    message_id,
                    payload: json!("firefox"),
                }
                .to_value(),
            )
            .expect("send");

        assert_eq!(pending.await.expect("reply"), json!("firefox"));
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_peer_drops() {
        let (messenger, far) = endpoint();

        let pending = messenger.send(json!({"type": "app.get", "what": "platform"}));
        drop(far);

        let result = pending.await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_dispatch_no_reply_runs_handlers() {
        let router = MessageRouter::new();
        let hits = Arc::new(Mutex::new(0usize));

        let hits_clone = Arc::clone(&hits);
        router.on(
            "composer.forward",
            Arc::new(move |_, _| {
                *hits_clone.lock() += 1;
                Ok(Reply::Ignored)
            }),
        );

        router.dispatch_no_reply(
            &json!({"type": "composer.forward"}),
            &SenderInfo::default(),
        );

        assert_eq!(*hits.lock(), 1);
    }

    #[tokio::test]
    async fn test_sender_info_reaches_handlers() {
        let (near, far) = Channel::duplex();
        let router = Arc::new(MessageRouter::new());

        let tab = TabId::new(7);
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        router.on(
            "app.get",
            Arc::new(move |_, sender: &SenderInfo| {
                *seen_clone.lock() = sender.tab_id;
                Ok(Reply::value(Value::Null))
            }),
        );

        let _server = Messenger::attach_with(
            near,
            router,
            SenderInfo {
                client_id: None,
                tab_id: tab,
            },
        );
        let client = Messenger::attach(far);

        client
            .send(json!({"type": "app.get", "what": "platform"}))
            .await
            .expect("reply");

        assert_eq!(*seen.lock(), tab);
    }
}
