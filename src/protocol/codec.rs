//! Message codec.
//!
//! Encodes requests into single self-delimited JSON text units and decodes
//! inbound text into [`InboundMessage`]s.
//!
//! Decoding is tolerant: malformed JSON, non-object values and objects that
//! are neither a response nor an event are dropped (`None`), never surfaced
//! as errors. A corrupt or partial line must not take the connection down,
//! and must not affect delivery of the frames that follow it.

// ============================================================================
// Imports
// ============================================================================

use serde_json::{Value, from_value, to_string};
use tracing::{debug, trace};

use crate::error::Result;

use super::{Event, Request, Response};

// ============================================================================
// InboundMessage
// ============================================================================

/// One decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Reply to a request, routed by `id`.
    Response(Response),
    /// Unsolicited notification, fanned out to event handlers.
    Event(Event),
}

// ============================================================================
// Encode
// ============================================================================

/// Encodes a request as one compact JSON text unit (no trailing newline).
///
/// Compact JSON never contains a raw newline, so line-based transports can
/// append `\n` as the delimiter.
///
/// # Errors
///
/// Returns [`crate::Error::Json`] if params fail to serialize.
pub fn encode(request: &Request) -> Result<String> {
    Ok(to_string(request)?)
}

// ============================================================================
// Decode
// ============================================================================

/// Decodes one line/frame of transport input.
///
/// Returns `None` for anything that is not a well-formed response or event.
#[must_use]
pub fn decode(raw: &str) -> Option<InboundMessage> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
            trace!(error = %e, len = raw.len(), "Dropping non-JSON frame");
            return None;
        }
    };

    match classify(&value) {
        Kind::Response => match from_value::<Response>(value) {
            Ok(response) => Some(InboundMessage::Response(response)),
            Err(e) => {
                debug!(error = %e, "Dropping response with unusable id");
                None
            }
        },

        Kind::Event => match from_value::<Event>(value) {
            Ok(event) => Some(InboundMessage::Event(event)),
            Err(e) => {
                debug!(error = %e, "Dropping malformed event");
                None
            }
        },

        Kind::Other => {
            trace!("Dropping frame that is neither response nor event");
            None
        }
    }
}

enum Kind {
    Response,
    Event,
    Other,
}

/// A numeric or string `id` makes a response; no `id` plus a string
/// `method` makes an event.
fn classify(value: &Value) -> Kind {
    let Value::Object(object) = value else {
        return Kind::Other;
    };

    match object.get("id") {
        Some(Value::Number(_) | Value::String(_)) => Kind::Response,
        None | Some(Value::Null) if object.get("method").is_some_and(Value::is_string) => {
            Kind::Event
        }
        _ => Kind::Other,
    }
}

// ============================================================================
// Tests
// ============================================================================
