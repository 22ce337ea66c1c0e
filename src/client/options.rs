//! Connection tuning options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use bidi_client::ConnectionOptions;
//!
//! let options = ConnectionOptions::new()
//!     .with_command_timeout(Duration::from_secs(10))
//!     .with_max_pending(256);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use super::replay::DEFAULT_REPLAY_CAPACITY;

// ============================================================================
// Constants
// ============================================================================

/// Default deadline for a request when the caller passes none.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Maximum outstanding requests before new ones are rejected.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// How long `close()` waits for the dispatch loop to drain.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Per-connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Deadline applied by `send` when the caller passes `None`.
    pub command_timeout: Duration,

    /// Outstanding request limit.
    pub max_pending: usize,

    /// Capacity of the queue holding events for the first handler.
    pub replay_capacity: usize,

    /// Grace period for the dispatch loop to stop on `close()`.
    pub close_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            max_pending: DEFAULT_MAX_PENDING,
            replay_capacity: DEFAULT_REPLAY_CAPACITY,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Sets the default request deadline.
    #[inline]
    #[must_use]
    pub const fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Sets the outstanding request limit. Zero is treated as one.
    #[inline]
    #[must_use]
    pub const fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }

    /// Sets the replay queue capacity. Zero is treated as one.
    #[inline]
    #[must_use]
    pub const fn with_replay_capacity(mut self, capacity: usize) -> Self {
        self.replay_capacity = capacity;
        self
    }

    /// Sets the close grace period.
    #[inline]
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
