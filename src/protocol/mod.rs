//! Wire protocol message types.
//!
//! This module defines the message format exchanged between execution
//! contexts (hub and clients).
//!
//! # Protocol Overview
//!
//! From ARCHITECTURE.md Section 2:
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `message` | client → hub | One-shot command request |
//! | `response` | hub → client | One-shot command response |
//! | `<topic>.listen` | client → hub | Subscription declaration |
//! | `<topic>.respond` | hub → client | Subscribed event delivery |
//! | `backgroundPageLoaded` | frame → parent | Relay readiness sentinel |
//! | `port` | frame → frame | Port emulation over the relay |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Wire envelope parsing and construction |
//! | `command` | Typed engine command payloads |

// ============================================================================
// Submodules
// ============================================================================

/// Wire envelope parsing and construction.
pub mod envelope;

/// Typed engine command payloads.
pub mod command;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{AppInfo, EngineCommand};
pub use envelope::{
    Envelope, LISTEN_SUFFIX, PORT_TYPE, READY_TYPE, REQUEST_TYPE, RESPOND_SUFFIX, RESPONSE_TYPE,
};
