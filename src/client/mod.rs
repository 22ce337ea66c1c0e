//! Asynchronous BiDi client.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | [`Connection`] and its dispatch loop |
//! | `correlation` | Request id to result slot table |
//! | `events` | Ordered event handler registry |
//! | `options` | [`ConnectionOptions`] |
//! | `replay` | Bounded queue of events awaiting the first handler |

// ============================================================================
// Submodules
// ============================================================================

/// Connection and dispatch loop.
pub mod connection;

/// Request/response correlation.
pub mod correlation;

/// Event fan-out.
pub mod events;

/// Connection options.
pub mod options;

/// Pre-ready event buffering.
pub mod replay;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionState, LoopState};
pub use correlation::{CorrelationTable, ResultSlot};
pub use events::{EventHandler, EventRegistry, Registration};
pub use options::ConnectionOptions;
pub use replay::{DEFAULT_REPLAY_CAPACITY, ReplayQueue};
