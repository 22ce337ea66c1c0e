//! Builder for launch configuration.

// ============================================================================
// Imports
// ============================================================================

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::ConnectionOptions;
use crate::error::{Error, Result};

use super::options::{BINARY_PATH_ENV, DEFAULT_READY_TIMEOUT, DEFAULT_STOP_TIMEOUT, LaunchOptions};

// ============================================================================
// LaunchOptionsBuilder
// ============================================================================

/// Builder for [`LaunchOptions`].
///
/// Use [`LaunchOptions::builder()`] to create one.
#[derive(Debug, Clone)]
pub struct LaunchOptionsBuilder {
    binary: Option<PathBuf>,
    headless: bool,
    extra_args: Vec<String>,
    ready_timeout: Duration,
    stop_timeout: Duration,
    connection: ConnectionOptions,
}

impl Default for LaunchOptionsBuilder {
    fn default() -> Self {
        Self {
            binary: None,
            headless: false,
            extra_args: Vec::new(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            connection: ConnectionOptions::default(),
        }
    }
}

// ============================================================================
// LaunchOptionsBuilder Implementation
// ============================================================================

impl LaunchOptionsBuilder {
    /// Creates a builder with no binary set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the path to the automation binary.
    ///
    /// When unset, `build()` falls back to the `VIBIUM_BIN_PATH`
    /// environment variable.
    #[inline]
    #[must_use]
    pub fn binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary = Some(path.into());
        self
    }

    /// Runs the browser headless.
    #[inline]
    #[must_use]
    pub fn headless(mut self) -> Self {
        self.headless = true;
        self
    }

    /// Appends one argument.
    #[inline]
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[inline]
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the ready signal deadline.
    #[inline]
    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Sets the stop grace period.
    #[inline]
    #[must_use]
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Sets options for the resulting connection.
    #[inline]
    #[must_use]
    pub fn connection(mut self, options: ConnectionOptions) -> Self {
        self.connection = options;
        self
    }

    /// Builds the options with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no binary is set and `VIBIUM_BIN_PATH` is unset
    /// - [`Error::BinaryNotFound`] if the binary path doesn't exist
    pub fn build(self) -> Result<LaunchOptions> {
        let binary = self.validate_binary()?;

        Ok(LaunchOptions {
            binary,
            headless: self.headless,
            extra_args: self.extra_args,
            ready_timeout: self.ready_timeout,
            stop_timeout: self.stop_timeout,
            connection: self.connection,
        })
    }
}

// ============================================================================
// Validation
// ============================================================================

impl LaunchOptionsBuilder {
    fn validate_binary(&self) -> Result<PathBuf> {
        let binary = self
            .binary
            .clone()
            .or_else(|| {
                env::var_os(BINARY_PATH_ENV)
                    .filter(|value| !value.is_empty())
                    .map(PathBuf::from)
            })
            .ok_or_else(|| {
                Error::config(
                    "Automation binary path is required. Use .binary() or set VIBIUM_BIN_PATH.\n\
                     Example: LaunchOptions::builder().binary(\"/usr/local/bin/vibium\")",
                )
            })?;

        if !binary.is_file() {
            return Err(Error::binary_not_found(&binary));
        }

        Ok(binary)
    }
}

// ============================================================================
// Tests
// ============================================================================
