//! Event message types.
//!
//! Events are unsolicited notifications sent from the remote end to the
//! local end. They carry no correlation `id`.
//!
//! # Event Types
//!
//! | Method | Parsed as |
//! |--------|-----------|
//! | `vibium:ready` | [`ParsedEvent::Ready`] |
//! | `network.beforeRequestSent` | [`ParsedEvent::NetworkBeforeRequestSent`] |
//! | `browsingContext.userPromptOpened` | [`ParsedEvent::UserPromptOpened`] |
//! | anything else | [`ParsedEvent::Unknown`] |

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identifiers::ContextId;

// ============================================================================
// Constants
// ============================================================================

/// Method of the readiness event emitted once the remote end has initialized.
pub const READY_METHOD: &str = "vibium:ready";

/// Method of console/log events, whose context lives under `source`.
const LOG_ENTRY_ADDED: &str = "log.entryAdded";

// ============================================================================
// Event
// ============================================================================

/// An event notification from remote end to local end.
///
/// # Format
///
/// ```json
/// {
///   "method": "module.eventName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name in `module.eventName` format.
    pub method: String,

    /// Event-specific data. Missing params decode as an empty object.
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

impl Event {
    /// Creates an event.
    #[inline]
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// Returns the module name from the method.
    ///
    /// ```ignore
    /// let event = Event::new("browsingContext.load", json!({}));
    /// assert_eq!(event.module(), "browsingContext");
    /// ```
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the event name from the method.
    #[inline]
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.method.split_once('.').map(|(_, name)| name).unwrap_or_default()
    }

    /// Returns `true` for the readiness sentinel.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.method == READY_METHOD
    }

    /// Returns the browsing context this event belongs to, if any.
    ///
    /// `log.entryAdded` carries its context under `params.source.context`;
    /// every other event uses `params.context`.
    #[must_use]
    pub fn context(&self) -> Option<&str> {
        let direct = self.params.get("context").and_then(Value::as_str);
        if self.method == LOG_ENTRY_ADDED {
            return self
                .params
                .get("source")
                .and_then(|s| s.get("context"))
                .and_then(Value::as_str)
                .or(direct);
        }
        direct
    }

    /// Returns `true` if this event is addressed to `context`, or carries no
    /// context at all.
    #[inline]
    #[must_use]
    pub fn belongs_to(&self, context: &ContextId) -> bool {
        self.context().is_none_or(|c| c == context.as_str())
    }

    /// Parses the event into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ParsedEvent {
        match self.method.as_str() {
            READY_METHOD => ParsedEvent::Ready,

            "network.beforeRequestSent" => {
                let request = self.params.get("request").cloned().unwrap_or(Value::Null);
                ParsedEvent::NetworkBeforeRequestSent {
                    context: self.get_optional_string("context"),
                    is_blocked: self
                        .params
                        .get("isBlocked")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    request_id: str_field(&request, "request"),
                    url: str_field(&request, "url"),
                    method: request
                        .get("method")
                        .and_then(Value::as_str)
                        .unwrap_or("GET")
                        .to_string(),
                    headers: parse_headers(request.get("headers")),
                }
            }

            "browsingContext.userPromptOpened" => ParsedEvent::UserPromptOpened {
                context: self.get_string("context"),
                prompt_type: self.get_string_or("type", "alert"),
                message: self.get_string("message"),
                default_value: self.get_optional_string("defaultValue"),
            },

            _ => ParsedEvent::Unknown {
                method: self.method.clone(),
                params: self.params.clone(),
            },
        }
    }

    /// Gets a string from params.
    #[inline]
    fn get_string(&self, key: &str) -> String {
        str_field(&self.params, key)
    }

    /// Gets a string from params with default.
    #[inline]
    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(default)
            .to_string()
    }

    /// Gets an optional string from params.
    #[inline]
    fn get_optional_string(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

// ============================================================================
// ParsedEvent
// ============================================================================

/// Parsed event types for type-safe handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedEvent {
    /// Remote end finished initializing.
    Ready,

    /// Network request about to be sent.
    NetworkBeforeRequestSent {
        /// Browsing context that issued the request.
        context: Option<String>,
        /// Whether the request is paused by an intercept.
        is_blocked: bool,
        /// Request ID.
        request_id: String,
        /// Request URL.
        url: String,
        /// HTTP method.
        method: String,
        /// Request headers, flattened to `name -> value`.
        headers: FxHashMap<String, String>,
    },

    /// A user prompt (alert, confirm, prompt, beforeunload) opened.
    UserPromptOpened {
        /// Browsing context showing the prompt.
        context: String,
        /// Prompt type.
        prompt_type: String,
        /// Prompt message.
        message: String,
        /// Default value for `prompt` dialogs.
        default_value: Option<String>,
    },

    /// Unknown event type.
    Unknown {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
}

// ============================================================================
// Helpers
// ============================================================================

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Flattens BiDi headers (`[{name, value: {type, value}}]`) into a map.
fn parse_headers(headers: Option<&Value>) -> FxHashMap<String, String> {
    let Some(Value::Array(entries)) = headers else {
        return FxHashMap::default();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?;
            let value = match entry.get("value")? {
                Value::String(s) => s.clone(),
                other => other.get("value")?.as_str()?.to_string(),
            };
            Some((name.to_string(), value))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_event_module_and_name() {
        let event = Event::new("browsingContext.load", json!({}));
        assert_eq!(event.module(), "browsingContext");
        assert_eq!(event.event_name(), "load");

        let event = Event::new("vibium:ws.created", json!({}));
        assert_eq!(event.module(), "vibium:ws");
        assert_eq!(event.event_name(), "created");
    }

    #[test]
    fn test_event_missing_params() {
        let event: Event = serde_json::from_str(r#"{"method": "x.y"}"#).expect("parse");
        assert_eq!(event.params, json!({}));
    }

    #[test]
    fn test_ready_sentinel() {
        let event = Event::new(READY_METHOD, json!({}));
        assert!(event.is_ready());
        assert_eq!(event.parse(), ParsedEvent::Ready);
    }

    #[test]
    fn test_context_direct() {
        let event = Event::new("browsingContext.load", json!({"context": "A"}));
        assert_eq!(event.context(), Some("A"));
        assert!(event.belongs_to(&ContextId::new("A")));
        assert!(!event.belongs_to(&ContextId::new("B")));
    }

    #[test]
    fn test_context_log_entry_uses_source() {
        let event = Event::new(
            "log.entryAdded",
            json!({"type": "console", "source": {"context": "B"}}),
        );
        assert_eq!(event.context(), Some("B"));
    }

    #[test]
    fn test_context_absent_belongs_to_everyone() {
        let event = Event::new("x.y", json!({"v": 1}));
        assert_eq!(event.context(), None);
        assert!(event.belongs_to(&ContextId::new("anything")));
    }

    #[test]
    fn test_before_request_sent_parsing() {
        let event = Event::new(
            "network.beforeRequestSent",
            json!({
                "context": "ctx",
                "isBlocked": true,
                "request": {
                    "request": "req-1",
                    "url": "https://example.com/api",
                    "method": "POST",
                    "headers": [
                        {"name": "Accept", "value": {"type": "string", "value": "*/*"}}
                    ]
                }
            }),
        );

        match event.parse() {
            ParsedEvent::NetworkBeforeRequestSent {
                context,
                is_blocked,
                request_id,
                url,
                method,
                headers,
            } => {
                assert_eq!(context.as_deref(), Some("ctx"));
                assert!(is_blocked);
                assert_eq!(request_id, "req-1");
                assert_eq!(url, "https://example.com/api");
                assert_eq!(method, "POST");
                assert_eq!(headers.get("Accept").map(String::as_str), Some("*/*"));
            }
            other => panic!("unexpected parsed event: {other:?}"),
        }
    }

    #[test]
    fn test_user_prompt_parsing() {
        let event = Event::new(
            "browsingContext.userPromptOpened",
            json!({"context": "c", "type": "prompt", "message": "Name?", "defaultValue": "x"}),
        );

        match event.parse() {
            ParsedEvent::UserPromptOpened {
                prompt_type,
                message,
                default_value,
                ..
            } => {
                assert_eq!(prompt_type, "prompt");
                assert_eq!(message, "Name?");
                assert_eq!(default_value.as_deref(), Some("x"));
            }
            other => panic!("unexpected parsed event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event() {
        let event = Event::new("custom.unknownEvent", json!({"foo": "bar"}));
        match event.parse() {
            ParsedEvent::Unknown { method, .. } => assert_eq!(method, "custom.unknownEvent"),
            other => panic!("expected Unknown variant, got {other:?}"),
        }
    }
}
