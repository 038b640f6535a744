//! Wire envelope parsing and construction.
//!
//! Every message crossing a context boundary is a JSON object with a
//! mandatory `type` discriminator. This module parses those objects exactly
//! once, at the trust boundary, into the tagged [`Envelope`] enum; the rest
//! of the crate never inspects raw `type` strings.
//!
//! See ARCHITECTURE.md Section 2 for the wire table.
//!
//! # Format
//!
//! ```json
//! { "type": "message", "messageId": 4, "payload": { "type": "app.get", "what": "platform" } }
//! { "type": "response", "messageId": 4, "payload": "firefox" }
//! { "type": "filters.listen", "filter": ["added", "removed"] }
//! { "type": "filters.respond", "action": "added", "args": [{ "text": "||ads.example^" }] }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::error::{Error, Result};
use crate::identifiers::{MessageId, TabId};

// ============================================================================
// Constants
// ============================================================================

/// Wire `type` of a one-shot request.
pub const REQUEST_TYPE: &str = "message";

/// Wire `type` of a one-shot response.
pub const RESPONSE_TYPE: &str = "response";

/// Wire `type` of a relayed persistent-port frame.
pub const PORT_TYPE: &str = "port";

/// Wire `type` of the frame relay readiness sentinel.
pub const READY_TYPE: &str = "backgroundPageLoaded";

/// Suffix declaring a subscription.
pub const LISTEN_SUFFIX: &str = ".listen";

/// Suffix delivering a subscribed event.
pub const RESPOND_SUFFIX: &str = ".respond";

// ============================================================================
// Envelope
// ============================================================================

/// A parsed wire message.
///
/// The `Unknown` variant preserves messages with an unrecognized `type`
/// so boundaries can log and ignore them without failing the pump.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// One-shot command request, `{type:"message", messageId, payload}`.
    Request {
        /// Correlation ID allocated by the sender.
        message_id: MessageId,
        /// The command payload, itself carrying a `type` field.
        payload: Value,
    },

    /// One-shot response, `{type:"response", messageId, payload}`.
    Response {
        /// Matches the request's ID.
        message_id: MessageId,
        /// The reply value, `null` when no listener produced one.
        payload: Value,
    },

    /// Subscription declaration, `{type:"<topic>.listen", filter, tabId?}`.
    Listen {
        /// Event category, e.g. `filters`.
        topic: String,
        /// Event action names of interest.
        filter: Vec<String>,
        /// Optional tab scoping.
        tab_id: Option<TabId>,
    },

    /// Event delivery, `{type:"<topic>.respond", action, args}`.
    Event {
        /// Event category, e.g. `filters`.
        topic: String,
        /// Which action fired, e.g. `added`.
        action: String,
        /// Action-specific arguments.
        args: Vec<Value>,
    },

    /// Frame relay readiness sentinel.
    Ready,

    /// Persistent-port frame relayed over postMessage.
    Port {
        /// Channel name of the emulated port.
        name: String,
        /// The port-level payload.
        payload: Value,
    },

    /// Anything with an unrecognized `type`, preserved for logging.
    Unknown {
        /// The unrecognized `type` string.
        kind: String,
        /// The original object.
        body: Value,
    },
}

impl Envelope {
    /// Returns the wire `type` string for this envelope.
    #[must_use]
    pub fn kind(&self) -> String {
        match self {
            Self::Request { .. } => REQUEST_TYPE.to_string(),
            Self::Response { .. } => RESPONSE_TYPE.to_string(),
            Self::Listen { topic, .. } => format!("{topic}{LISTEN_SUFFIX}"),
            Self::Event { topic, .. } => format!("{topic}{RESPOND_SUFFIX}"),
            Self::Ready => READY_TYPE.to_string(),
            Self::Port { .. } => PORT_TYPE.to_string(),
            Self::Unknown { kind, .. } => kind.clone(),
        }
    }

    /// Returns `true` for `.respond` event envelopes.
    #[inline]
    #[must_use]
    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event { .. })
    }

    /// Parses a wire value into an envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnvelope`] if the value is not an object,
    /// lacks a string `type`, or a recognized `type` is missing its
    /// mandatory fields. Unrecognized `type` strings are NOT errors; they
    /// parse into [`Envelope::Unknown`].
    pub fn from_value(value: Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::invalid_envelope("message is not an object"))?;

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_envelope("missing string `type` field"))?
            .to_string();

        match kind.as_str() {
            REQUEST_TYPE => {
                let message_id = require_message_id(object)?;
                let payload = object.get("payload").cloned().unwrap_or(Value::Null);
                Ok(Self::Request {
                    message_id,
                    payload,
                })
            }

            RESPONSE_TYPE => {
                let message_id = require_message_id(object)?;
                let payload = object.get("payload").cloned().unwrap_or(Value::Null);
                Ok(Self::Response {
                    message_id,
                    payload,
                })
            }

            READY_TYPE => Ok(Self::Ready),

            PORT_TYPE => {
                let name = object
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::invalid_envelope("port frame missing `name`"))?
                    .to_string();
                let payload = object.get("payload").cloned().unwrap_or(Value::Null);
                Ok(Self::Port { name, payload })
            }

            _ => {
                if let Some(topic) = kind.strip_suffix(LISTEN_SUFFIX) {
                    parse_listen(topic, object)
                } else if let Some(topic) = kind.strip_suffix(RESPOND_SUFFIX) {
                    parse_event(topic, object)
                } else {
                    Ok(Self::Unknown { kind, body: value })
                }
            }
        }
    }

    /// Builds the wire value for this envelope.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Request {
                message_id,
                payload,
            } => json!({
                "type": REQUEST_TYPE,
                "messageId": message_id,
                "payload": payload,
            }),

            Self::Response {
                message_id,
                payload,
            } => json!({
                "type": RESPONSE_TYPE,
                "messageId": message_id,
                "payload": payload,
            }),

            Self::Listen {
                topic,
                filter,
                tab_id,
            } => {
                let mut object = Map::new();
                object.insert("type".into(), json!(format!("{topic}{LISTEN_SUFFIX}")));
                object.insert("filter".into(), json!(filter));
                if let Some(tab_id) = tab_id {
                    object.insert("tabId".into(), json!(tab_id));
                }
                Value::Object(object)
            }

            Self::Event {
                topic,
                action,
                args,
            } => json!({
                "type": format!("{topic}{RESPOND_SUFFIX}"),
                "action": action,
                "args": args,
            }),

            Self::Ready => json!({ "type": READY_TYPE }),

            Self::Port { name, payload } => json!({
                "type": PORT_TYPE,
                "name": name,
                "payload": payload,
            }),

            Self::Unknown { body, .. } => body.clone(),
        }
    }
}

// ============================================================================
// Parsing Helpers
// ============================================================================

fn require_message_id(object: &Map<String, Value>) -> Result<MessageId> {
    object
        .get("messageId")
        .and_then(Value::as_u64)
        .map(MessageId::new)
        .ok_or_else(|| Error::invalid_envelope("missing numeric `messageId`"))
}

fn parse_listen(topic: &str, object: &Map<String, Value>) -> Result<Envelope> {
    let filter = object
        .get("filter")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let tab_id = match object.get("tabId") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let raw = value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| Error::invalid_envelope("`tabId` is not a tab number"))?;
            Some(
                TabId::new(raw)
                    .ok_or_else(|| Error::invalid_envelope("`tabId` must be non-zero"))?,
            )
        }
    };

    Ok(Envelope::Listen {
        topic: topic.to_string(),
        filter,
        tab_id,
    })
}

fn parse_event(topic: &str, object: &Map<String, Value>) -> Result<Envelope> {
    let action = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_envelope("event missing `action`"))?
        .to_string();

    let args = object
        .get("args")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    Ok(Envelope::Event {
        topic: topic.to_string(),
        action,
        args,
    })
}

// ============================================================================
// Serde Integration
// ============================================================================

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(D::Error::custom)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let envelope = Envelope::Request {
            message_id: MessageId::new(4),
            payload: json!({ "type": "app.get", "what": "platform" }),
        };

        let wire = envelope.to_value();
        assert_eq!(wire["type"], "message");
        assert_eq!(wire["messageId"], 4);

        let back = Envelope::from_value(wire).expect("parse");
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_listen_parsing() {
        let wire = json!({
            "type": "filters.listen",
            "filter": ["added", "removed"],
            "tabId": 3,
        });

        let envelope = Envelope::from_value(wire).expect("parse");
        match envelope {
            Envelope::Listen {
                topic,
                filter,
                tab_id,
            } => {
                assert_eq!(topic, "filters");
                assert_eq!(filter, vec!["added", "removed"]);
                assert_eq!(tab_id, TabId::new(3));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_listen_without_filter_is_empty() {
        let envelope = Envelope::from_value(json!({ "type": "app.listen" })).expect("parse");
        match envelope {
            Envelope::Listen { topic, filter, .. } => {
                assert_eq!(topic, "app");
                assert!(filter.is_empty());
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_event_parsing() {
        let wire = json!({
            "type": "filters.respond",
            "action": "added",
            "args": [{ "text": "||ads.example^" }],
        });

        let envelope = Envelope::from_value(wire).expect("parse");
        match envelope {
            Envelope::Event {
                topic,
                action,
                args,
            } => {
                assert_eq!(topic, "filters");
                assert_eq!(action, "added");
                assert_eq!(args[0]["text"], "||ads.example^");
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_ready_sentinel() {
        let envelope =
            Envelope::from_value(json!({ "type": "backgroundPageLoaded" })).expect("parse");
        assert_eq!(envelope, Envelope::Ready);
        assert_eq!(envelope.kind(), READY_TYPE);
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let wire = json!({ "type": "hello", "name": "ui" });
        let envelope = Envelope::from_value(wire.clone()).expect("parse");
        match &envelope {
            Envelope::Unknown { kind, body } => {
                assert_eq!(kind, "hello");
                assert_eq!(body, &wire);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
        assert_eq!(envelope.to_value(), wire);
    }

    #[test]
    fn test_missing_type_is_rejected() {
        let result = Envelope::from_value(json!({ "messageId": 1 }));
        assert!(matches!(result, Err(Error::InvalidEnvelope { .. })));
    }

    #[test]
    fn test_request_without_message_id_is_rejected() {
        let result = Envelope::from_value(json!({ "type": "message", "payload": 1 }));
        assert!(matches!(result, Err(Error::InvalidEnvelope { .. })));
    }

    #[test]
    fn test_zero_tab_id_is_rejected() {
        let result = Envelope::from_value(json!({ "type": "app.listen", "tabId": 0 }));
        assert!(matches!(result, Err(Error::InvalidEnvelope { .. })));
    }

    #[test]
    fn test_is_event() {
        let event = Envelope::Event {
            topic: "subscriptions".into(),
            action: "added".into(),
            args: Vec::new(),
        };
        assert!(event.is_event());
        assert!(!Envelope::Ready.is_event());
    }

    #[test]
    fn test_serde_passthrough() {
        let text = r#"{"type":"response","messageId":9,"payload":{"ok":true}}"#;
        let envelope: Envelope = serde_json::from_str(text).expect("deserialize");
        match &envelope {
            Envelope::Response {
                message_id,
                payload,
            } => {
                assert_eq!(*message_id, MessageId::new(9));
                assert_eq!(payload["ok"], true);
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
