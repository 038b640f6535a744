//! WebSocket transport.
//!
//! Connects contexts running in separate processes. The client side opens
//! a socket per port and announces itself with a `hello` frame carrying
//! the channel name and a generated client ID; the listening side upgrades
//! incoming connections, reads the `hello`, and surfaces an [`Accepted`]
//! exactly like the in-process transport.
//!
//! See ARCHITECTURE.md Section 3.1.
//!
//! # Connection Flow
//!
//! 1. Hub binds the listener to `localhost:0` (random port)
//! 2. Client connects and sends `{"type":"hello","name":…,"clientId":…}`
//! 3. Listener emits the accepted channel to the hub
//! 4. Both ends exchange envelope frames until either side closes

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::identifiers::ClientId;

use super::connector::{Accepted, Channel, Connector};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for the `hello` frame after a socket upgrade.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire `type` of the transport-level opening frame.
const HELLO_TYPE: &str = "hello";

// ============================================================================
// SocketConnector
// ============================================================================

/// Client-side WebSocket connector.
///
/// Each `open` establishes one socket toward the hub's listener URL.
#[derive(Debug, Clone)]
pub struct SocketConnector {
    url: String,
}

impl SocketConnector {
    /// Creates a connector targeting `url` (e.g. `ws://127.0.0.1:4050`).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for SocketConnector {
    async fn open(&self, name: &str) -> Result<Channel> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| Error::connection(format!("connect to {} failed: {e}", self.url)))?;

        let client_id = ClientId::generate();
        let hello = json!({
            "type": HELLO_TYPE,
            "name": name,
            "clientId": client_id,
        });

        let (client_end, bridge_end) = Channel::duplex();

        let mut ws_stream = ws_stream;
        ws_stream
            .send(Message::Text(hello.to_string().into()))
            .await
            .map_err(|e| Error::connection(format!("hello failed: {e}")))?;

        tokio::spawn(pump(ws_stream, bridge_end));

        debug!(name, %client_id, url = %self.url, "socket channel opened");

        Ok(client_end)
    }
}

// ============================================================================
// SocketListener
// ============================================================================

/// Hub-side WebSocket listener.
///
/// # Example
///
/// ```ignore
/// let (listener, accepts) = SocketListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let hub = MessageHub::new();
/// hub.run(accepts);
/// println!("clients connect to {}", listener.ws_url());
/// ```
pub struct SocketListener {
    port: u16,
}

impl SocketListener {
    /// Binds a listener and starts its accept loop.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<(Self, mpsc::UnboundedReceiver<Accepted>)> {
        let addr = SocketAddr::new(ip, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(listener, accept_tx));

        info!(port = actual_port, "socket listener bound");

        Ok((Self { port: actual_port }, accept_rx))
    }

    /// Returns the port the listener is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL clients connect to.
    ///
    /// Format: `ws://127.0.0.1:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Accepts sockets until the hub drops the accept receiver.
async fn accept_loop(listener: TcpListener, accept_tx: mpsc::UnboundedSender<Accepted>) {
    debug!("accept loop started");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                };

                let accept_tx = accept_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, addr, accept_tx).await {
                        warn!(error = %e, ?addr, "connection handling failed");
                    }
                });
            }

            () = accept_tx.closed() => {
                debug!("accept loop terminating, hub is gone");
                break;
            }
        }
    }
}

/// Upgrades one socket, reads its `hello`, and hands the channel to the hub.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    accept_tx: mpsc::UnboundedSender<Accepted>,
) -> Result<()> {
    let mut ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

    let hello = timeout(HELLO_TIMEOUT, ws_stream.next())
        .await
        .map_err(|_| Error::connection_timeout(HELLO_TIMEOUT.as_millis() as u64))?;

    let text = match hello {
        Some(Ok(Message::Text(text))) => text,
        other => {
            return Err(Error::protocol(format!("expected hello frame, got {other:?}")));
        }
    };

    let (name, client_id) = parse_hello(&text)?;
    debug!(name, %client_id, ?addr, "hello received");

    let (hub_end, bridge_end) = Channel::duplex();
    tokio::spawn(pump(ws_stream, bridge_end));

    accept_tx
        .send(Accepted {
            name,
            client_id,
            channel: hub_end,
        })
        .map_err(|_| Error::connection("hub dropped the accept stream"))?;

    Ok(())
}

fn parse_hello(text: &str) -> Result<(String, ClientId)> {
    let value: Value = serde_json::from_str(text)?;

    if value.get("type").and_then(Value::as_str) != Some(HELLO_TYPE) {
        return Err(Error::protocol("opening frame is not a hello"));
    }

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::protocol("hello missing `name`"))?
        .to_string();

    let client_id = value
        .get("clientId")
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<Uuid>().ok())
        .map(ClientId::from_uuid)
        .unwrap_or_else(ClientId::generate);

    Ok((name, client_id))
}

// ============================================================================
// Socket Pump
// ============================================================================

/// Bridges one WebSocket to one channel end until either side closes.
async fn pump<S>(ws_stream: WebSocketStream<S>, channel: Channel)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let Channel {
        tx: inbound_tx,
        rx: mut outbound_rx,
    } = channel;

    loop {
        tokio::select! {
            frame = ws_read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Value>(&text) {
                            Ok(value) => {
                                if inbound_tx.send(value).is_err() {
                                    debug!("channel consumer gone, closing socket");
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "dropping non-JSON frame"),
                        }
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("socket closed by remote");
                        break;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "socket error");
                        break;
                    }

                    None => {
                        debug!("socket stream ended");
                        break;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            value = outbound_rx.recv() => {
                match value {
                    Some(value) => {
                        if let Err(e) = ws_write.send(Message::Text(value.to_string().into())).await {
                            warn!(error = %e, "socket send failed");
                            break;
                        }
                    }
                    None => {
                        debug!("channel closed, shutting socket down");
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_listener_bind_random_port() {
        let (listener, _accepts) = SocketListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        assert!(listener.port() > 0);
        assert!(listener.ws_url().starts_with("ws://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_open_roundtrip() {
        let (listener, mut accepts) = SocketListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        let connector = SocketConnector::new(listener.ws_url());
        let mut client = connector.open("ui").await.expect("open");

        let mut accepted = accepts.recv().await.expect("accepted");
        assert_eq!(accepted.name, "ui");

        client.tx.send(json!({"type": "ping"})).expect("send");
        assert_eq!(
            accepted.channel.rx.recv().await,
            Some(json!({"type": "ping"}))
        );

        accepted.channel.tx.send(json!({"type": "pong"})).expect("send");
        assert_eq!(client.rx.recv().await, Some(json!({"type": "pong"})));
    }

    #[tokio::test]
    async fn test_dropping_hub_end_disconnects_client() {
        let (listener, mut accepts) = SocketListener::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");

        let connector = SocketConnector::new(listener.ws_url());
        let mut client = connector.open("ui").await.expect("open");

        let accepted = accepts.recv().await.expect("accepted");
        drop(accepted.channel);

        assert_eq!(client.rx.recv().await, None);
    }

    #[test]
    fn test_parse_hello_rejects_other_frames() {
        let result = parse_hello(r#"{"type":"message","messageId":1}"#);
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }
}
