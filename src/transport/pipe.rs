//! Newline-delimited JSON transport.
//!
//! One message per line. Used for the binary's stdio pipes, but works over
//! any `AsyncRead`/`AsyncWrite` pair.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::error::Result;

use super::{TransportReader, TransportWriter};

// ============================================================================
// PipeReader
// ============================================================================

/// Reads newline-delimited messages.
///
/// Blank lines are skipped. Invalid UTF-8 is replaced rather than treated as
/// a read error, so one corrupt line only costs that line.
pub struct PipeReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> PipeReader<R> {
    /// Wraps a reader.
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::with_capacity(4096),
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> TransportReader for PipeReader<R> {
    async fn read_frame(&mut self) -> Result<Option<String>> {
        loop {
            // Partial lines stay in `buf` if this future is dropped mid-read.
            let n = self.inner.read_until(b'\n', &mut self.buf).await?;
            if n == 0 && self.buf.is_empty() {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.buf).trim().to_string();
            self.buf.clear();
            if line.is_empty() {
                if n == 0 {
                    return Ok(None);
                }
                continue;
            }

            trace!(len = line.len(), "Read line");
            return Ok(Some(line));
        }
    }
}

// ============================================================================
// PipeWriter
// ============================================================================

/// Writes one message per line and flushes after each.
pub struct PipeWriter<W> {
    inner: Option<W>,
}

impl<W: AsyncWrite + Unpin + Send> PipeWriter<W> {
    /// Wraps a writer.
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self {
            inner: Some(writer),
        }
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TransportWriter for PipeWriter<W> {
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        let Some(writer) = self.inner.as_mut() else {
            return Err(crate::error::Error::ConnectionClosed);
        };

        let mut line = String::with_capacity(frame.len() + 1);
        line.push_str(frame);
        line.push('\n');

        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.inner.take() {
            writer.shutdown().await?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
