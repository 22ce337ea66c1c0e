//! Error types for the BiDi client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use bidi_client::{Connection, Result};
//!
//! async fn example(connection: &Connection) -> Result<()> {
//!     let tree = connection.send("browsingContext.getTree", None, None).await?;
//!     println!("{tree}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::BinaryNotFound`] |
//! | Process | [`Error::ProcessLaunchFailed`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::TooManyPending`] |
//! | Timeout | [`Error::RequestTimeout`], [`Error::BridgeTimeout`] |
//! | Bridge | [`Error::BridgeNotStarted`], [`Error::BridgeReentrant`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::Url`] |
//!
//! A send-style call fails with exactly one of [`Error::Protocol`],
//! [`Error::RequestTimeout`] or [`Error::ConnectionClosed`], so callers can
//! tell "the server said no" from "the server never answered" from "the
//! connection is gone".

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::path::PathBuf;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::RequestId;

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
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when launch or connection options are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Automation binary not found at path.
    #[error("Binary not found at: {path}")]
    BinaryNotFound {
        /// Path where the binary was expected.
        path: PathBuf,
    },

    // ========================================================================
    // Process Errors
    // ========================================================================
    /// Failed to launch the automation binary.
    ///
    /// Returned when the process cannot be spawned or exits before
    /// signalling readiness.
    #[error("Failed to launch binary: {message}")]
    ProcessLaunchFailed {
        /// Description of the launch failure.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timeout waiting for the remote end to become ready.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed while the request was outstanding, or before it
    /// could be sent.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The remote end answered the request with an error response.
    #[error("{error}: {message}")]
    Protocol {
        /// Error kind reported by the remote end (e.g. `no such frame`).
        error: String,
        /// Human readable message.
        message: String,
    },

    /// Too many requests outstanding on one connection.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Requests currently pending.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    // ========================================================================
    // Timeout Errors
    // ========================================================================
    /// No response arrived before the caller's deadline.
    #[error("Command '{method}' (request {request_id}) timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The request ID that timed out.
        request_id: RequestId,
        /// Method of the request.
        method: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// A synchronous call did not complete on the background runtime in time.
    #[error(
        "Synchronous call did not complete within {timeout_ms}ms; \
         the background runtime may be stuck or the operation is taking too long"
    )]
    BridgeTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Bridge Errors
    // ========================================================================
    /// The background runtime is not running, or stopped before the call
    /// completed.
    #[error("Background runtime is not running")]
    BridgeNotStarted,

    /// A blocking call was made from the background runtime's own thread.
    ///
    /// Blocking there would stall the dispatch loop that has to deliver the
    /// awaited response.
    #[error("Blocking call issued from the background runtime thread")]
    BridgeReentrant,

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
    WebSocket(#[from] Box<WsError>),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<WsError> for Error {
    fn from(err: WsError) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a binary not found error.
    #[inline]
    pub fn binary_not_found(path: impl Into<PathBuf>) -> Self {
        Self::BinaryNotFound { path: path.into() }
    }

    /// Creates a process launch failed error.
    #[inline]
    pub fn process_launch_failed(message: impl Into<String>) -> Self {
        Self::ProcessLaunchFailed {
            message: message.into(),
        }
    }

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

    /// Creates a protocol error from the remote end's error kind and message.
    #[inline]
    pub fn protocol(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Protocol {
            error: error.into(),
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(
        request_id: RequestId,
        method: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        Self::RequestTimeout {
            request_id,
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a bridge timeout error.
    #[inline]
    pub fn bridge_timeout(timeout_ms: u64) -> Self {
        Self::BridgeTimeout { timeout_ms }
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
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. } | Self::BridgeTimeout { .. }
        )
    }

    /// Returns `true` if the request was rejected, by the remote end or by
    /// the local pending-request limit.
    #[inline]
    #[must_use]
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Self::Protocol { .. } | Self::TooManyPending { .. })
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

    /// Returns the remote error kind for protocol errors.
    #[inline]
    #[must_use]
    pub fn protocol_kind(&self) -> Option<&str> {
        match self {
            Self::Protocol { error, .. } => Some(error),
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("failed to connect");
        assert_eq!(err.to_string(), "Connection failed: failed to connect");
    }

    #[test]
    fn test_protocol_display() {
        let err = Error::protocol("no such frame", "Frame 7 does not exist");
        assert_eq!(err.to_string(), "no such frame: Frame 7 does not exist");
        assert_eq!(err.protocol_kind(), Some("no such frame"));
    }

    #[test]
    fn test_request_timeout_display() {
        let err = Error::request_timeout(RequestId::new(2), "ping", 50);
        assert_eq!(
            err.to_string(),
            "Command 'ping' (request 2) timed out after 50ms"
        );
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::request_timeout(RequestId::new(1), "x", 1).is_timeout());
        assert!(Error::bridge_timeout(10).is_timeout());
        assert!(Error::connection_timeout(10).is_timeout());
        assert!(!Error::ConnectionClosed.is_timeout());
        assert!(!Error::protocol("a", "b").is_timeout());
    }

    #[test]
    fn test_categories_are_disjoint() {
        let protocol = Error::protocol("unknown command", "nope");
        let timeout = Error::request_timeout(RequestId::new(3), "x", 1);
        let closed = Error::ConnectionClosed;

        assert!(protocol.is_protocol_error());
        assert!(!protocol.is_timeout() && !protocol.is_connection_error());

        assert!(timeout.is_timeout());
        assert!(!timeout.is_protocol_error() && !timeout.is_connection_error());

        assert!(closed.is_connection_error());
        assert!(!closed.is_protocol_error() && !closed.is_timeout());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing binary path");
        assert_eq!(err.to_string(), "Configuration error: missing binary path");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_ws_error() {
        let err: Error = WsError::ConnectionClosed.into();
        assert!(err.is_connection_error());
    }
}
