//! Launch configuration for the automation binary.
//!
//! # Example
//!
//! ```no_run
//! use bidi_client::{Connection, LaunchOptions};
//!
//! # async fn example() -> bidi_client::Result<()> {
//! let options = LaunchOptions::builder()
//!     .binary("/usr/local/bin/vibium")
//!     .headless()
//!     .build()?;
//!
//! let connection = Connection::launch(options).await?;
//! connection.close().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Builder pattern for launch configuration.
pub mod builder;

/// Launch options and argument rendering.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::LaunchOptionsBuilder;
pub use options::{BINARY_PATH_ENV, DEFAULT_READY_TIMEOUT, DEFAULT_STOP_TIMEOUT, LaunchOptions};
