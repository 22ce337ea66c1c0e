//! Validated launch configuration for the automation binary.
//!
//! # Example
//!
//! ```ignore
//! use bidi_client::LaunchOptions;
//!
//! let options = LaunchOptions::builder()
//!     .binary("/usr/local/bin/vibium")
//!     .headless()
//!     .build()?;
//!
//! let args = options.to_args();
//! // ["pipe", "--headless"]
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::ConnectionOptions;

use super::builder::LaunchOptionsBuilder;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable consulted when no binary path is configured.
pub const BINARY_PATH_ENV: &str = "VIBIUM_BIN_PATH";

/// How long to wait for the ready signal after spawning.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// How long `stop` waits for the process to exit before killing it.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Subcommand that makes the binary speak over stdio.
const PIPE_SUBCOMMAND: &str = "pipe";

// ============================================================================
// LaunchOptions
// ============================================================================

/// Everything needed to start the automation binary.
///
/// Built by [`LaunchOptionsBuilder`], which checks the binary exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Path to the binary.
    pub binary: PathBuf,

    /// Run the browser without a window.
    pub headless: bool,

    /// Additional arguments appended after the built-in ones.
    pub extra_args: Vec<String>,

    /// Deadline for the ready signal.
    pub ready_timeout: Duration,

    /// Grace period between closing stdin and killing the process.
    pub stop_timeout: Duration,

    /// Options for the resulting connection.
    pub connection: ConnectionOptions,
}

impl LaunchOptions {
    /// Creates a launch configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> LaunchOptionsBuilder {
        LaunchOptionsBuilder::new()
    }

    /// Creates options for `binary` with default settings, without checking
    /// that it exists.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            headless: false,
            extra_args: Vec::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            connection: ConnectionOptions::default(),
        }
    }

    /// Path to the binary.
    #[inline]
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Converts options to command-line arguments.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(2 + self.extra_args.len());
        args.push(PIPE_SUBCOMMAND.to_string());

        if self.headless {
            args.push("--headless".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_defaults() {
        let options = LaunchOptions::new("/opt/vibium");
        assert_eq!(options.binary(), Path::new("/opt/vibium"));
        assert!(!options.headless);
        assert_eq!(options.ready_timeout, Duration::from_secs(30));
        assert_eq!(options.stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_to_args_minimal() {
        let options = LaunchOptions::new("/opt/vibium");
        assert_eq!(options.to_args(), vec!["pipe"]);
    }

    #[test]
    fn test_to_args_headless_and_extra() {
        let mut options = LaunchOptions::new("/opt/vibium");
        options.headless = true;
        options.extra_args = vec!["--verbose".to_string()];

        assert_eq!(options.to_args(), vec!["pipe", "--headless", "--verbose"]);
    }
}
