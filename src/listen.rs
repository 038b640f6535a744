//! Subscription declarations.
//!
//! A subscription is a declared interest in a category of future events.
//! The hub may be evicted at any time, losing every in-memory filter, so a
//! UI page must never assume a subscription survives a reconnection: the
//! declaration is re-sent over the port on every (re)connection, and
//! resending is idempotent (the hub replaces the topic's filter set).
//!
//! There is deliberately no unsubscribe primitive; pages live for the
//! duration of their subscription need, and dropping the channel tears
//! down the hub-side state.
//!
//! See ARCHITECTURE.md Section 4.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::warn;

use crate::connection::ConnectionManager;
use crate::identifiers::TabId;
use crate::port::Port;
use crate::protocol::Envelope;

// ============================================================================
// ListenRequest
// ============================================================================

/// One subscription declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenRequest {
    /// Event category, e.g. `filters`.
    pub topic: String,
    /// Event action names of interest, e.g. `added`, `removed`.
    pub filter: Vec<String>,
    /// Optional tab scoping.
    pub tab_id: Option<TabId>,
}

impl ListenRequest {
    /// Creates a declaration for `topic` with the given action filter.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        filter: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            filter: filter.into_iter().map(Into::into).collect(),
            tab_id: None,
        }
    }

    /// Scopes the declaration to one tab.
    #[must_use]
    pub fn for_tab(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Builds the wire envelope for this declaration.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        Envelope::Listen {
            topic: self.topic.clone(),
            filter: self.filter.clone(),
            tab_id: self.tab_id,
        }
    }
}

// ============================================================================
// listen
// ============================================================================

/// Declares a subscription for the lifetime of the manager.
///
/// Registers a connect listener that sends the `.listen` envelope over the
/// current port every time the connection is (re)established (including
/// right now, if already connected), then triggers a connect attempt.
/// Transport absence is surfaced through the manager's disconnect
/// listeners, never to this caller.
pub async fn listen(manager: &Arc<ConnectionManager>, request: ListenRequest) {
    let declaration = request.clone();

    manager.add_connect_listener(Arc::new(move |port: &Arc<Port>| {
        if let Err(e) = port.post(&declaration.to_envelope()) {
            // The port died under us; the reconnect path re-declares.
            warn!(topic = %declaration.topic, error = %e, "listen declaration lost");
        }
    }));

    let _ = manager.connect().await;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::transport::memory;

    #[tokio::test]
    async fn test_listen_declares_on_first_connect() {
        let (connector, mut accepts) = memory::listener();
        let manager = ConnectionManager::new("ui", Arc::new(connector));

        listen(
            &manager,
            ListenRequest::new("filters", ["added", "removed"]),
        )
        .await;

        let mut accepted = accepts.recv().await.expect("accepted");
        let declared = accepted.channel.rx.recv().await.expect("declaration");

        assert_eq!(
            declared,
            json!({"type": "filters.listen", "filter": ["added", "removed"]})
        );
    }

    #[tokio::test]
    async fn test_listen_redeclares_after_reconnect() {
        let (connector, mut accepts) = memory::listener();
        let manager = ConnectionManager::new("ui", Arc::new(connector));

        listen(
            &manager,
            ListenRequest::new("subscriptions", ["added"]).for_tab(TabId::new(3).unwrap()),
        )
        .await;

        let mut first = accepts.recv().await.expect("accepted");
        let declared = first.channel.rx.recv().await.expect("declaration");
        assert_eq!(declared["type"], "subscriptions.listen");
        assert_eq!(declared["tabId"], 3);

        // Worker eviction: the hub side drops the channel.
        drop(first);

        // The manager reconnects after its cooldown and re-declares with
        // identical filter contents.
        let mut second = accepts.recv().await.expect("reconnected");
        let redeclared = second.channel.rx.recv().await.expect("re-declaration");
        assert_eq!(redeclared, declared);
    }

    #[tokio::test]
    async fn test_listen_with_unreachable_hub_does_not_fail() {
        let (connector, accepts) = memory::listener();
        drop(accepts);

        let manager = ConnectionManager::new("ui", Arc::new(connector));

        // Surfaced via disconnect listeners only; the call itself returns.
        listen(&manager, ListenRequest::new("app", ["addSubscription"])).await;
        assert!(!manager.is_connected());
    }
}
