//! Cross-context messaging layer for a browser ad-blocking extension.
//!
//! Browser extension UI runs scattered across isolated execution contexts
//! (background worker, popup, options page, devtools panel, injected
//! dialogs) with independent lifecycles and no shared memory. This crate
//! is the messaging layer that connects them: typed request/response
//! exchanges, fire-and-forget events, and long-lived subscription streams
//! that survive the background context being evicted and restarted.
//!
//! The filter-matching engine itself is an external collaborator reached
//! only through the command contracts in [`protocol::command`].
//!
//! # Architecture
//!
//! Two roles:
//!
//! - **Hub** ([`MessageHub`]): the background context. Accepts named port
//!   connections, tracks per-client subscription filters, answers one-shot
//!   commands, fans engine events out to subscribers. All of its state is
//!   in-memory and may vanish at any time.
//! - **Clients**: every UI context. Each owns one [`ConnectionManager`]
//!   per channel name; [`listen()`] re-declares subscriptions on every
//!   (re)connection, so a hub restart is invisible to the user.
//!
//! Key design principles:
//!
//! - All cross-context traffic is JSON with a `type` discriminator,
//!   parsed once at the boundary into [`protocol::Envelope`]
//! - One-shot correlation and port subscriptions are separate channels
//!   with separate lifecycles
//! - Reconnection waits out a cooldown and re-declares everything
//! - Errors surface as `Err` futures or disconnect listeners, never
//!   panics across a message boundary
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use adblock_messaging::transport::memory;
//! use adblock_messaging::{ConnectionManager, ListenRequest, MessageHub, listen};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Background context.
//!     let (connector, accepts) = memory::listener();
//!     let hub = MessageHub::new();
//!     hub.run(accepts);
//!
//!     // A UI context subscribes; the declaration is re-sent on every
//!     // reconnect automatically.
//!     let manager = ConnectionManager::new("options", Arc::new(connector));
//!     listen(&manager, ListenRequest::new("filters", ["added", "removed"])).await;
//!
//!     // The engine reports a change; every subscriber hears about it.
//!     hub.publish(
//!         "filters",
//!         "added",
//!         vec![serde_json::json!({"text": "||ads.example^"})],
//!     );
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | Per-context connection manager with reconnect cooldown |
//! | [`devtools`] | Devtools panel bridge and record dedup |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Background-internal event emitter |
//! | [`hub`] | The background hub |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`listen`] | Subscription declarations |
//! | [`listener`] | Identity-deduplicated callback sets |
//! | [`messaging`] | One-shot request/response correlation |
//! | [`port`] | The port abstraction |
//! | [`protocol`] | Wire envelope and command types |
//! | [`relay`] | Frame-to-frame postMessage relay |
//! | [`transport`] | Channel plumbing (in-process, WebSocket) |

// ============================================================================
// Modules
// ============================================================================

/// Per-context connection management.
///
/// Owns the single outbound port of a UI context and its reconnect
/// lifecycle.
pub mod connection;

/// Devtools panel bridge.
///
/// Record deduplication and panel-bound message types.
pub mod devtools;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Background-internal event emitter.
pub mod events;

/// The background hub: subscriptions, fan-out, one-shot serving.
pub mod hub;

/// Type-safe identifiers for messaging entities.
pub mod identifiers;

/// Subscription declarations, re-sent on every (re)connection.
pub mod listen;

/// Identity-deduplicated callback sets.
pub mod listener;

/// One-shot request/response messaging.
pub mod messaging;

/// Named, long-lived, bidirectional ports.
pub mod port;

/// Wire protocol message types.
pub mod protocol;

/// Frame-to-frame message relay for sandboxed UI surfaces.
pub mod relay;

/// Transport layer (in-process and WebSocket channels).
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{ConnectionManager, ManagerConfig};

// Devtools types
pub use devtools::{
    DevtoolsBridge, FilterHit, ItemType, Panel, PanelCommand, PanelEvent, PanelMessage,
    RequestRecord,
};

// Error types
pub use error::{Error, Result};

// Event emitter types
pub use events::{EventEmitter, EventListener};

// Hub types
pub use hub::MessageHub;

// Identifier types
pub use identifiers::{ClientId, MessageId, TabId};

// Subscription types
pub use listen::{ListenRequest, listen};

// Listener types
pub use listener::{Listener, ListenerSet};

// Messaging types
pub use messaging::{
    MESSAGING_CHANNEL, MessageRouter, Messenger, Reply, RequestHandler, RequestSender, SenderInfo,
};

// Port types
pub use port::Port;

// Protocol types
pub use protocol::{AppInfo, EngineCommand, Envelope};

// Relay types
pub use relay::{FrameRelay, HandshakeConfig, INIT_ACK, INIT_TYPE, RelayHost};

// Transport types
pub use transport::{Accepted, Channel, Connector, MemoryConnector, SocketConnector, SocketListener};
