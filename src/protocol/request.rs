//! Request and Response message types.
//!
//! Defines the message format for command requests and responses
//! between the local end (Rust) and the remote end (automation binary).

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

// ============================================================================
// Request
// ============================================================================

/// A command request from local end to remote end.
///
/// # Format
///
/// ```json
/// {
///   "id": 1,
///   "method": "module.methodName",
///   "params": { ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Unique identifier for request/response correlation.
    pub id: RequestId,

    /// Command name in `module.methodName` format.
    pub method: String,

    /// Command parameters. Always an object on the wire.
    pub params: Value,
}

impl Request {
    /// Creates a request.
    ///
    /// `None` or `null` params are sent as an empty object.
    #[inline]
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        let params = match params {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(value) => value,
        };

        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response from remote end to local end.
///
/// # Format
///
/// Success:
/// ```json
/// {
///   "id": 1,
///   "result": { ... }
/// }
/// ```
///
/// Error:
/// ```json
/// {
///   "id": 1,
///   "type": "error",
///   "error": "error kind",
///   "message": "error message"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    /// Matches the request `id`.
    pub id: RequestId,

    /// Response type marker (`"success"`, `"error"`, or absent).
    #[serde(rename = "type", default)]
    pub response_type: Option<String>,

    /// Result data (if success).
    #[serde(default)]
    pub result: Option<Value>,

    /// Error kind (if error).
    #[serde(default)]
    pub error: Option<String>,

    /// Error message (if error).
    #[serde(default)]
    pub message: Option<String>,
}

impl Response {
    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.response_type.as_deref() == Some("error")
    }

    /// Returns `true` if this is a success response.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.is_error()
    }

    /// Extracts the result value, returning error if response was error.
    ///
    /// A missing result is returned as `null`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] carrying the remote error kind and message.
    pub fn into_result(self) -> Result<Value> {
        if self.is_error() {
            let kind = self.error.unwrap_or_else(|| "unknown".to_string());
            let message = self
                .message
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(Error::protocol(kind, message));
        }

        Ok(self.result.unwrap_or(Value::Null))
    }

    /// Gets a string value from the result.
    ///
    /// Returns empty string if key not found or not a string.
    #[inline]
    #[must_use]
    pub fn get_string(&self, key: &str) -> String {
        self.result
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
