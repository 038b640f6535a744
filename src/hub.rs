//! The background hub.
//!
//! The hub is the messaging layer of the background context: it accepts
//! named channel connections, keeps per-client subscription filters,
//! answers one-shot commands through a shared [`MessageRouter`], and fans
//! engine events out to every subscribed client.
//!
//! The background context may be a service worker, evicted and restarted
//! at any time. All hub state is in-memory; clients are responsible
//! for re-declaring their subscriptions on reconnect
//! (ARCHITECTURE.md Section 4), which [`MessageHub::evict`] exercises in
//! tests.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::events::EventEmitter;
use crate::identifiers::{ClientId, TabId};
use crate::messaging::{MESSAGING_CHANNEL, MessageRouter, Messenger, SenderInfo};
use crate::protocol::Envelope;
use crate::transport::Accepted;

// ============================================================================
// TopicFilter
// ============================================================================

/// One client's filter for one topic.
#[derive(Debug)]
struct TopicFilter {
    actions: FxHashSet<String>,
    tab_id: Option<TabId>,
}

impl TopicFilter {
    /// Whether an event with `action` scoped to `event_tab` passes.
    fn accepts(&self, action: &str, event_tab: Option<TabId>) -> bool {
        if !self.actions.contains(action) {
            return false;
        }
        match (self.tab_id, event_tab) {
            (Some(subscribed), Some(tab)) => subscribed == tab,
            // Unscoped subscriptions see everything; unscoped events reach
            // everyone interested in the action.
            _ => true,
        }
    }
}

// ============================================================================
// ClientState
// ============================================================================

/// Hub-side state for one connected port client.
struct ClientState {
    name: String,
    sink: mpsc::UnboundedSender<Value>,
    filters: FxHashMap<String, TopicFilter>,
}

// ============================================================================
// MessageHub
// ============================================================================

/// Accepts clients, tracks subscriptions, fans out events.
pub struct MessageHub {
    clients: Mutex<FxHashMap<ClientId, ClientState>>,
    router: Arc<MessageRouter>,
}

impl MessageHub {
    /// Creates a hub with an empty router.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            clients: Mutex::new(FxHashMap::default()),
            router: Arc::new(MessageRouter::new()),
        })
    }

    /// Returns the router answering one-shot commands.
    #[must_use]
    pub fn router(&self) -> Arc<MessageRouter> {
        Arc::clone(&self.router)
    }

    /// Consumes a listener's accept stream.
    ///
    /// Runs until the accept stream ends.
    pub fn run(self: &Arc<Self>, mut accepts: mpsc::UnboundedReceiver<Accepted>) {
        let hub = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(accepted) = accepts.recv().await {
                let Some(hub) = hub.upgrade() else { break };
                hub.attach(accepted);
            }
            debug!("accept stream ended");
        });
    }

    /// Attaches one accepted connection.
    ///
    /// Connections named [`MESSAGING_CHANNEL`] become one-shot endpoints
    /// served by the hub router; everything else is a subscription port.
    pub fn attach(self: &Arc<Self>, accepted: Accepted) {
        let Accepted {
            name,
            client_id,
            channel,
        } = accepted;

        if name == MESSAGING_CHANNEL {
            debug!(%client_id, "one-shot endpoint attached");
            // The pump lives as long as the channel; the handle can go.
            drop(Messenger::attach_with(
                channel,
                Arc::clone(&self.router),
                SenderInfo {
                    client_id: Some(client_id),
                    tab_id: None,
                },
            ));
            return;
        }

        info!(name, %client_id, "client connected");

        self.clients.lock().insert(
            client_id,
            ClientState {
                name: name.clone(),
                sink: channel.tx,
                filters: FxHashMap::default(),
            },
        );

        let hub = Arc::downgrade(self);
        let mut rx = channel.rx;
        tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                let Some(hub) = hub.upgrade() else { return };
                hub.handle_frame(client_id, value);
            }

            if let Some(hub) = hub.upgrade() {
                hub.detach(client_id);
            }
        });
    }

    /// Handles one inbound frame from a port client.
    fn handle_frame(&self, client_id: ClientId, value: Value) {
        match Envelope::from_value(value) {
            Ok(Envelope::Listen {
                topic,
                filter,
                tab_id,
            }) => {
                debug!(%client_id, topic, ?filter, "subscription declared");
                let mut clients = self.clients.lock();
                if let Some(client) = clients.get_mut(&client_id) {
                    // Re-declarations replace the topic's filter wholesale,
                    // which is what makes resending idempotent.
                    client.filters.insert(
                        topic,
                        TopicFilter {
                            actions: filter.into_iter().collect(),
                            tab_id,
                        },
                    );
                }
            }

            Ok(other) => trace!(%client_id, kind = %other.kind(), "ignoring port message"),

            Err(e) => debug!(%client_id, error = %e, "dropping malformed frame"),
        }
    }

    /// Drops one client's state.
    fn detach(&self, client_id: ClientId) {
        if self.clients.lock().remove(&client_id).is_some() {
            info!(%client_id, "client disconnected");
        }
    }
}

// ============================================================================
// MessageHub - Fan-out
// ============================================================================

impl MessageHub {
    /// Delivers an event to every client subscribed to `topic`/`action`.
    pub fn publish(&self, topic: &str, action: &str, args: Vec<Value>) {
        self.publish_scoped(topic, action, args, None);
    }

    /// Delivers a tab-scoped event.
    ///
    /// Reaches clients whose filter for `topic` contains `action` and
    /// whose tab scope matches (unscoped subscriptions match everything).
    pub fn publish_scoped(
        &self,
        topic: &str,
        action: &str,
        args: Vec<Value>,
        tab_id: Option<TabId>,
    ) {
        let envelope = Envelope::Event {
            topic: topic.to_string(),
            action: action.to_string(),
            args,
        };
        let wire = envelope.to_value();

        let mut dead = Vec::new();
        {
            let clients = self.clients.lock();
            for (client_id, client) in clients.iter() {
                let interested = client
                    .filters
                    .get(topic)
                    .is_some_and(|filter| filter.accepts(action, tab_id));
                if !interested {
                    continue;
                }

                trace!(%client_id, name = %client.name, topic, action, "event delivered");
                if client.sink.send(wire.clone()).is_err() {
                    dead.push(*client_id);
                }
            }
        }

        for client_id in dead {
            self.detach(client_id);
        }
    }

    /// Bridges an engine event emitter into the fan-out.
    ///
    /// For each action, events named `<topic>.<action>` on `emitter` are
    /// published to subscribers of `topic`.
    pub fn forward(self: &Arc<Self>, emitter: &EventEmitter, topic: &str, actions: &[&str]) {
        for action in actions {
            let hub = Arc::downgrade(self);
            let topic = topic.to_string();
            let action = (*action).to_string();

            emitter.on(
                format!("{topic}.{action}"),
                Arc::new(move |args: &[Value]| {
                    if let Some(hub) = hub.upgrade() {
                        hub.publish(&topic, &action, args.to_vec());
                    }
                }),
            );
        }
    }
}

// ============================================================================
// MessageHub - Lifecycle
// ============================================================================

impl MessageHub {
    /// Returns the number of connected port clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// Returns how many clients hold a filter for `topic`.
    #[must_use]
    pub fn subscription_count(&self, topic: &str) -> usize {
        self.clients
            .lock()
            .values()
            .filter(|client| client.filters.contains_key(topic))
            .count()
    }

    /// Simulates service-worker eviction.
    ///
    /// Every connected client is dropped and all subscription state
    /// forgotten. Clients observe a disconnect and are expected to
    /// reconnect and re-declare.
    pub fn evict(&self) {
        let dropped: Vec<_> = {
            let mut clients = self.clients.lock();
            clients.drain().collect()
        };
        info!(count = dropped.len(), "evicted all clients");
    }
}

// ============================================================================
// Tests
// ============================================================================
