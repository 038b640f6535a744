//! Type-safe identifiers for messaging entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time:
//! a correlation [`MessageId`] can never be passed where a [`TabId`] is
//! expected, and vice versa.
//!
//! | Type | Backing | Generation |
//! |------|---------|------------|
//! | [`MessageId`] | `u64` | monotonic counter per endpoint |
//! | [`TabId`] | `NonZeroU32` | assigned by the host browser |
//! | [`ClientId`] | UUID v4 | generated per port connection |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// MessageId
// ============================================================================

/// Correlates a one-shot request with its response.
///
/// IDs are allocated by a monotonically increasing counter owned by the
/// sending endpoint. They are only unique per endpoint, which is all
/// correlation requires; responses travel back on the channel the request
/// went out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    /// Creates a message ID from a raw counter value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// TabId
// ============================================================================

/// Identifies a browser tab.
///
/// Tab 0 is reserved by the host browser, so the backing value is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(NonZeroU32);

impl TabId {
    /// Creates a tab ID, rejecting zero.
    #[inline]
    #[must_use]
    pub fn new(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self)
    }

    /// Returns the raw tab number.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ClientId
// ============================================================================

/// Identifies one connected client on the hub side.
///
/// Generated when a port connection is accepted, so the hub can key
/// per-client subscription state and tests can correlate connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a fresh random client ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[inline]
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_roundtrip() {
        let id = MessageId::new(42);
        assert_eq!(id.value(), 42);
        assert_eq!(id.to_string(), "42");

        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "42");
        let back: MessageId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, id);
    }

    #[test]
    fn test_tab_id_rejects_zero() {
        assert!(TabId::new(0).is_none());
        let tab = TabId::new(7).expect("valid tab id");
        assert_eq!(tab.get(), 7);
    }

    #[test]
    fn test_tab_id_zero_fails_deserialization() {
        let result = serde_json::from_str::<TabId>("0");
        assert!(result.is_err());
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
    }
}
