//! BiDi client - JSON command/event client for browser automation binaries.
//!
//! This library talks to an automation binary that speaks a WebDriver
//! BiDi-style protocol over a duplex text stream: stdio pipes of a launched
//! process, or a WebSocket.
//!
//! # Architecture
//!
//! The client follows a command/event model:
//!
//! - **Commands**: `{id, method, params}` answered by exactly one response
//!   carrying the same `id`
//! - **Events**: `{method, params}` pushed by the remote end at any time
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns one transport and one dispatch task
//! - Responses are correlated by id, in whatever order they arrive
//! - Every wait has a deadline; a timed-out request leaves nothing behind
//! - Events reach handlers in arrival order, handlers in registration order
//!
//! # Quick Start
//!
//! ```no_run
//! use bidi_client::{Connection, LaunchOptions, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let options = LaunchOptions::builder()
//!         .binary("/usr/local/bin/vibium")
//!         .headless()
//!         .build()?;
//!
//!     let connection = Connection::launch(options).await?;
//!
//!     connection.on_event(|event| println!("event: {}", event.method));
//!
//!     let tree = connection.send("browsingContext.getTree", None, None).await?;
//!     println!("contexts: {tree}");
//!
//!     connection.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bridge`] | Blocking calls onto a private background runtime |
//! | [`client`] | [`Connection`], correlation and event fan-out |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`interception`] | Route and dialog decisions for one browsing context |
//! | [`launch`] | Automation binary launch configuration |
//! | [`protocol`] | Wire message types and codec |
//! | [`sync_client`] | [`SyncConnection`], the blocking client |
//! | [`transport`] | Pipe, process and WebSocket transports |

// ============================================================================
// Modules
// ============================================================================

/// Synchronous bridge over a background runtime.
pub mod bridge;

/// Asynchronous client: connection, correlation, event fan-out.
///
/// - [`Connection`] - One session with the remote end
/// - [`ConnectionOptions`] - Timeouts and limits
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Request interception and dialog handling.
pub mod interception;

/// Launch configuration for the automation binary.
///
/// Use [`LaunchOptions::builder()`] to create a validated configuration.
pub mod launch;

/// Protocol message types.
///
/// Request/response/event structures and the line codec.
pub mod protocol;

/// Blocking client.
pub mod sync_client;

/// Transport layer.
///
/// Duplex message streams: stdio pipes, launched processes, WebSockets.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bridge types
pub use bridge::{Bridge, BridgeOptions};

// Client types
pub use client::{
    Connection, ConnectionOptions, ConnectionState, EventHandler, LoopState, ReplayQueue,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ContextId, HandlerId, RequestId};

// Interception types
pub use interception::{
    ContinueOverrides, Dialog, DialogDecision, FulfillResponse, InterceptedRequest, Interceptor,
    RouteDecision, UrlPattern,
};

// Launch types
pub use launch::{LaunchOptions, LaunchOptionsBuilder};

// Protocol types
pub use protocol::{Event, ParsedEvent};

// Sync client
pub use sync_client::SyncConnection;

// Transport types
pub use transport::{BinaryProcess, Transport, TransportReader, TransportWriter};
