//! Typed one-shot commands consumed from the filtering engine.
//!
//! The engine is an opaque collaborator; these are only the request
//! contracts UI code sends through the one-shot messenger. Command payloads
//! follow `module.operation` naming (ARCHITECTURE.md Section 2.1) and
//! travel inside a `{type:"message", messageId, payload}` envelope.
//!
//! | Module | Operations |
//! |--------|------------|
//! | `app` | `get`, `open` |
//! | `filters` | `get`, `importRaw`, `remove` |
//! | `subscriptions` | `get`, `add`, `remove`, `toggle` |
//! | `prefs` | `get`, `set` |

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, json};

use crate::error::{Error, Result};

// ============================================================================
// AppInfo
// ============================================================================

/// What an `app.get` command asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppInfo {
    /// UI locale and text direction.
    LocaleInfo,
    /// Version of the extension.
    AddonVersion,
    /// Host platform name.
    Platform,
    /// Host application name.
    Application,
}

impl AppInfo {
    /// Returns the wire string for this query.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LocaleInfo => "localeInfo",
            Self::AddonVersion => "addonVersion",
            Self::Platform => "platform",
            Self::Application => "application",
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "localeInfo" => Some(Self::LocaleInfo),
            "addonVersion" => Some(Self::AddonVersion),
            "platform" => Some(Self::Platform),
            "application" => Some(Self::Application),
            _ => None,
        }
    }
}

// ============================================================================
// EngineCommand
// ============================================================================

/// A one-shot command addressed to the filtering engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    /// `app.get`: query a scalar application property.
    AppGet {
        /// Which property to read.
        what: AppInfo,
    },

    /// `app.open`: ask the background context to open a page.
    AppOpen {
        /// Page identifier, e.g. `options`.
        what: String,
    },

    /// `filters.get`: list the user's custom filters.
    FiltersGet,

    /// `filters.importRaw`: parse and add raw filter text.
    ///
    /// The response is a list of error descriptors; empty means success.
    FiltersImportRaw {
        /// Raw filter list text, one filter per line.
        text: String,
    },

    /// `filters.remove`: remove one filter by its text.
    FiltersRemove {
        /// Exact filter text.
        text: String,
    },

    /// `subscriptions.get`: list filter subscriptions.
    SubscriptionsGet {
        /// Skip disabled subscriptions.
        ignore_disabled: bool,
        /// Restrict to downloadable subscriptions.
        downloadable: bool,
    },

    /// `subscriptions.add`: subscribe to a filter list.
    SubscriptionsAdd {
        /// Subscription URL.
        url: String,
    },

    /// `subscriptions.remove`: drop a subscription.
    SubscriptionsRemove {
        /// Subscription URL.
        url: String,
    },

    /// `subscriptions.toggle`: enable or disable a subscription.
    SubscriptionsToggle {
        /// Subscription URL.
        url: String,
        /// Keep the subscription installed when disabling.
        keep_installed: bool,
    },

    /// `prefs.get`: read one preference.
    PrefsGet {
        /// Preference key.
        key: String,
    },

    /// `prefs.set`: write one preference.
    PrefsSet {
        /// Preference key.
        key: String,
        /// New value.
        value: Value,
    },
}

impl EngineCommand {
    /// Returns the wire `type` of this command.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::AppGet { .. } => "app.get",
            Self::AppOpen { .. } => "app.open",
            Self::FiltersGet => "filters.get",
            Self::FiltersImportRaw { .. } => "filters.importRaw",
            Self::FiltersRemove { .. } => "filters.remove",
            Self::SubscriptionsGet { .. } => "subscriptions.get",
            Self::SubscriptionsAdd { .. } => "subscriptions.add",
            Self::SubscriptionsRemove { .. } => "subscriptions.remove",
            Self::SubscriptionsToggle { .. } => "subscriptions.toggle",
            Self::PrefsGet { .. } => "prefs.get",
            Self::PrefsSet { .. } => "prefs.set",
        }
    }

    /// Builds the one-shot payload for this command.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        match self {
            Self::AppGet { what } => json!({ "type": self.method(), "what": what.as_str() }),
            Self::AppOpen { what } => json!({ "type": self.method(), "what": what }),
            Self::FiltersGet => json!({ "type": self.method() }),
            Self::FiltersImportRaw { text } => json!({ "type": self.method(), "text": text }),
            Self::FiltersRemove { text } => json!({ "type": self.method(), "text": text }),
            Self::SubscriptionsGet {
                ignore_disabled,
                downloadable,
            } => json!({
                "type": self.method(),
                "ignoreDisabled": ignore_disabled,
                "downloadable": downloadable,
            }),
            Self::SubscriptionsAdd { url } => json!({ "type": self.method(), "url": url }),
            Self::SubscriptionsRemove { url } => json!({ "type": self.method(), "url": url }),
            Self::SubscriptionsToggle {
                url,
                keep_installed,
            } => json!({
                "type": self.method(),
                "url": url,
                "keepInstalled": keep_installed,
            }),
            Self::PrefsGet { key } => json!({ "type": self.method(), "key": key }),
            Self::PrefsSet { key, value } => {
                json!({ "type": self.method(), "key": key, "value": value })
            }
        }
    }

    /// Parses a one-shot payload back into a typed command.
    ///
    /// Used by hub-side handlers that want exhaustive matching instead of
    /// raw field access.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidEnvelope`] if the payload has no string `type` or
    ///   a known command is missing mandatory fields
    /// - [`Error::UnknownCommand`] if the `type` names no known command
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_envelope("command payload missing `type`"))?;

        match kind {
            "app.get" => {
                let what = required_str(payload, "what")?;
                let what = AppInfo::from_str(what)
                    .ok_or_else(|| Error::invalid_envelope(format!("unknown app.get: {what}")))?;
                Ok(Self::AppGet { what })
            }
            "app.open" => Ok(Self::AppOpen {
                what: required_str(payload, "what")?.to_string(),
            }),
            "filters.get" => Ok(Self::FiltersGet),
            "filters.importRaw" => Ok(Self::FiltersImportRaw {
                text: required_str(payload, "text")?.to_string(),
            }),
            "filters.remove" => Ok(Self::FiltersRemove {
                text: required_str(payload, "text")?.to_string(),
            }),
            "subscriptions.get" => Ok(Self::SubscriptionsGet {
                ignore_disabled: bool_field(payload, "ignoreDisabled"),
                downloadable: bool_field(payload, "downloadable"),
            }),
            "subscriptions.add" => Ok(Self::SubscriptionsAdd {
                url: required_str(payload, "url")?.to_string(),
            }),
            "subscriptions.remove" => Ok(Self::SubscriptionsRemove {
                url: required_str(payload, "url")?.to_string(),
            }),
            "subscriptions.toggle" => Ok(Self::SubscriptionsToggle {
                url: required_str(payload, "url")?.to_string(),
                keep_installed: bool_field(payload, "keepInstalled"),
            }),
            "prefs.get" => Ok(Self::PrefsGet {
                key: required_str(payload, "key")?.to_string(),
            }),
            "prefs.set" => Ok(Self::PrefsSet {
                key: required_str(payload, "key")?.to_string(),
                value: payload.get("value").cloned().unwrap_or(Value::Null),
            }),
            other => Err(Error::unknown_command(other)),
        }
    }
}

// ============================================================================
// Field Helpers
// ============================================================================

fn required_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_envelope(format!("command missing `{key}`")))
}

fn bool_field(payload: &Value, key: &str) -> bool {
    payload.get(key).and_then(Value::as_bool).unwrap_or(false)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_get_payload() {
        let command = EngineCommand::AppGet {
            what: AppInfo::AddonVersion,
        };
        let payload = command.to_payload();

        assert_eq!(payload["type"], "app.get");
        assert_eq!(payload["what"], "addonVersion");
    }

    #[test]
    fn test_subscriptions_get_field_names() {
        let command = EngineCommand::SubscriptionsGet {
            ignore_disabled: true,
            downloadable: false,
        };
        let payload = command.to_payload();

        assert_eq!(payload["ignoreDisabled"], true);
        assert_eq!(payload["downloadable"], false);
    }

    #[test]
    fn test_payload_roundtrip() {
        let commands = [
            EngineCommand::FiltersImportRaw {
                text: "||ads.example^".into(),
            },
            EngineCommand::SubscriptionsToggle {
                url: "https://lists.example/easylist.txt".into(),
                keep_installed: true,
            },
            EngineCommand::PrefsSet {
                key: "show_devtools_panel".into(),
                value: json!(true),
            },
        ];

        for command in commands {
            let payload = command.to_payload();
            let back = EngineCommand::from_payload(&payload).expect("parse");
            assert_eq!(back, command);
        }
    }

    #[test]
    fn test_unknown_command() {
        let payload = json!({ "type": "composer.openDialog" });
        let result = EngineCommand::from_payload(&payload);
        assert!(matches!(result, Err(Error::UnknownCommand { .. })));
    }

    #[test]
    fn test_missing_field() {
        let payload = json!({ "type": "filters.importRaw" });
        let result = EngineCommand::from_payload(&payload);
        assert!(matches!(result, Err(Error::InvalidEnvelope { .. })));
    }
}
