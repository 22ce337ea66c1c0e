//! Transport layer.
//!
//! A transport is one duplex stream of text messages between the client and
//! the automation binary. The dispatch loop owns the read half; the write
//! half only ever carries encoded requests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                         ┌──────────────────┐
//! │  Connection      │   stdio pipes (NDJSON)  │  Automation      │
//! │                  │◄───────────────────────►│  binary          │
//! │  dispatch loop   │   or WebSocket frames   │  (BiDi server)   │
//! └──────────────────┘                         └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `pipe` | Newline-delimited JSON over any async reader/writer pair |
//! | `process` | Launching the binary and waiting for the ready signal |
//! | `websocket` | WebSocket text frames |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;

use crate::client::ReplayQueue;
use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Newline-delimited JSON over async byte streams.
pub mod pipe;

/// Automation binary process management.
pub mod process;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use pipe::{PipeReader, PipeWriter};
pub use process::BinaryProcess;
pub use websocket::{WebSocketReader, WebSocketWriter};

// ============================================================================
// Traits
// ============================================================================

/// Read half of a transport.
#[async_trait]
pub trait TransportReader: Send {
    /// Reads the next message.
    ///
    /// Returns `Ok(None)` on end of stream. Must be cancel safe: the dispatch
    /// loop polls it inside `tokio::select!`, and a dropped call must not
    /// lose bytes already read.
    async fn read_frame(&mut self) -> Result<Option<String>>;
}

/// Write half of a transport.
#[async_trait]
pub trait TransportWriter: Send {
    /// Writes one encoded message, adding any framing the transport needs.
    async fn write_frame(&mut self, frame: &str) -> Result<()>;

    /// Closes the write side. Must be idempotent.
    async fn close(&mut self) -> Result<()>;
}

// ============================================================================
// Transport
// ============================================================================

/// A connected duplex stream, ready to hand to
/// [`Connection::connect`](crate::Connection::connect).
///
/// May also carry events that arrived before the ready signal and the
/// process that owns the stream.
pub struct Transport {
    pub(crate) reader: Box<dyn TransportReader>,
    pub(crate) writer: Box<dyn TransportWriter>,
    pub(crate) pre_ready: Option<ReplayQueue>,
    pub(crate) process: Option<BinaryProcess>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field(
                "pre_ready",
                &self.pre_ready.as_ref().map_or(0, ReplayQueue::len),
            )
            .field("process", &self.process)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Creates a transport from a reader and writer.
    #[must_use]
    pub fn new(reader: impl TransportReader + 'static, writer: impl TransportWriter + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            pre_ready: None,
            process: None,
        }
    }

    /// Creates a newline-delimited transport over any async byte streams.
    ///
    /// `reader` is the remote end's output (e.g. child stdout); `writer` is
    /// its input (e.g. child stdin).
    #[must_use]
    pub fn pipe<R, W>(reader: R, writer: W) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(PipeReader::new(reader), PipeWriter::new(writer))
    }

    /// Attaches events received before the ready signal.
    ///
    /// They are replayed to the first event handler that registers.
    #[must_use]
    pub fn with_pre_ready_events(mut self, queue: ReplayQueue) -> Self {
        self.pre_ready = Some(queue);
        self
    }

    /// Number of buffered pre-ready events.
    #[inline]
    #[must_use]
    pub fn pre_ready_len(&self) -> usize {
        self.pre_ready.as_ref().map_or(0, ReplayQueue::len)
    }

    pub(crate) fn with_process(mut self, process: BinaryProcess) -> Self {
        self.process = Some(process);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
