//! Wire protocol message types.
//!
//! This module defines the message format for communication between
//! the local end (Rust) and the remote end (automation binary).
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Shape |
//! |--------------|-----------|-------|
//! | `Request` | Local → Remote | `{"id", "method", "params"}` |
//! | `Response` | Remote → Local | `{"id", "result"}` or `{"id", "type": "error", "error", "message"}` |
//! | `Event` | Remote → Local | `{"method", "params"}` (no `id`) |
//!
//! # Command Naming
//!
//! Commands and events follow `module.methodName` format:
//!
//! - `browsingContext.navigate`
//! - `network.beforeRequestSent`
//! - `vibium:network.continue`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `codec` | Encoding and tolerant decoding |
//! | `event` | Event type and typed parsing |
//! | `request` | Request and Response types |

// ============================================================================
// Submodules
// ============================================================================

/// Encoding and tolerant decoding of wire messages.
pub mod codec;

/// Event message types.
pub mod event;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use codec::{InboundMessage, decode, encode};
pub use event::{Event, ParsedEvent, READY_METHOD};
pub use request::{Request, Response};
