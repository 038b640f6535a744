//! In-process transport.
//!
//! Connects contexts living in the same process: tests, embedded UI
//! surfaces, and anything else that does not need to cross a process
//! boundary. The listening side receives an [`Accepted`] per open, exactly
//! like the socket transport, so the hub cannot tell the two apart.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ClientId;

use super::connector::{Accepted, Channel, Connector};

// ============================================================================
// MemoryConnector
// ============================================================================

/// Client-side handle of the in-process transport.
///
/// Cloneable; every clone opens channels toward the same listener.
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<Accepted>,
}

/// Creates an in-process listener.
///
/// Returns the connector clients use and the stream of accepted
/// connections the hub consumes.
#[must_use]
pub fn listener() -> (MemoryConnector, mpsc::UnboundedReceiver<Accepted>) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    (MemoryConnector { accept_tx }, accept_rx)
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn open(&self, name: &str) -> Result<Channel> {
        let (client_end, hub_end) = Channel::duplex();
        let client_id = ClientId::generate();

        let accepted = Accepted {
            name: name.to_string(),
            client_id,
            channel: hub_end,
        };

        self.accept_tx
            .send(accepted)
            .map_err(|_| Error::connection("listener is gone"))?;

        debug!(name, %client_id, "memory channel opened");

        Ok(client_end)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[tokio::test]
    async fn test_open_surfaces_name_and_client_id() {
        let (connector, mut accepts) = listener();

        let channel = connector.open("ui").await.expect("open");
        let accepted = accepts.recv().await.expect("accepted");

        assert_eq!(accepted.name, "ui");
        channel.tx.send(json!({"type": "ping"})).expect("send");

        let mut hub_end = accepted.channel;
        assert_eq!(hub_end.rx.recv().await, Some(json!({"type": "ping"})));
    }

    #[tokio::test]
    async fn test_distinct_opens_get_distinct_client_ids() {
        let (connector, mut accepts) = listener();

        let _a = connector.open("ui").await.expect("open");
        let _b = connector.open("ui").await.expect("open");

        let first = accepts.recv().await.expect("first");
        let second = accepts.recv().await.expect("second");
        assert_ne!(first.client_id, second.client_id);
    }

    #[tokio::test]
    async fn test_open_fails_without_listener() {
        let (connector, accepts) = listener();
        drop(accepts);

        let result = connector.open("ui").await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
