//! Error types for the messaging layer.
//!
//! This module defines all error types used throughout the crate.
//! Propagation policy follows ARCHITECTURE.md Section 7: transport and
//! protocol failures are contained inside the messaging layer and surface
//! either as an `Err` on a one-shot future or as a disconnect-listener
//! invocation, never as a panic crossing a message boundary.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use adblock_messaging::{Result, Error};
//!
//! async fn example(messenger: &Messenger) -> Result<()> {
//!     let version = messenger.send(json!({"type": "app.get", "what": "addonVersion"})).await?;
//!     println!("engine version: {version}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidEnvelope`], [`Error::UnknownCommand`] |
//! | Execution | [`Error::RequestTimeout`], [`Error::HandshakeFailed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::MessageId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Channel could not be opened.
    ///
    /// Returned when the connector fails, e.g. the hub is unreachable
    /// because the extension was updated or removed mid-session.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timed out waiting for the peer context.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Channel closed while traffic was in flight.
    ///
    /// Every pending one-shot request fails with this when its endpoint's
    /// pump terminates.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// A wire value could not be parsed into an envelope.
    ///
    /// Returned at the trust boundary; inside the crate every message is a
    /// typed [`Envelope`](crate::protocol::Envelope).
    #[error("Invalid envelope: {message}")]
    InvalidEnvelope {
        /// What was malformed about the value.
        message: String,
    },

    /// Unknown command payload type.
    ///
    /// Returned when a payload's `type` names no known engine command.
    #[error("Unknown command: {command}")]
    UnknownCommand {
        /// The unrecognized command type.
        command: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// One-shot request timed out.
    ///
    /// Only produced by the bounded send variants; plain `send` waits
    /// indefinitely.
    #[error("Request {message_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        message_id: MessageId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Frame relay initialization handshake exhausted its attempts.
    ///
    /// The privileged frame never answered the `init` probe with the
    /// acknowledgment value.
    #[error("Relay handshake failed after {attempts} attempts")]
    HandshakeFailed {
        /// Number of probes sent before giving up.
        attempts: u32,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid envelope error.
    #[inline]
    pub fn invalid_envelope(message: impl Into<String>) -> Self {
        Self::InvalidEnvelope {
            message: message.into(),
        }
    }

    /// Creates an unknown command error.
    #[inline]
    pub fn unknown_command(command: impl Into<String>) -> Self {
        Self::UnknownCommand {
            command: command.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(message_id: MessageId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            message_id,
            timeout_ms,
        }
    }

    /// Creates a handshake failure error.
    #[inline]
    pub fn handshake_failed(attempts: u32) -> Self {
        Self::HandshakeFailed { attempts }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::HandshakeFailed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
