//! WebSocket transport.
//!
//! Each text frame carries one message. Binary, ping and pong frames are
//! ignored; a close frame or end of stream is EOF.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, connect_async};
use tracing::{debug, info, trace};
use url::Url;

use crate::error::{Error, Result};

use super::{Transport, TransportReader, TransportWriter};

// ============================================================================
// Connect
// ============================================================================

impl Transport {
    /// Connects to a `ws://` or `wss://` endpoint.
    ///
    /// # Errors
    ///
    /// - [`Error::Url`] if the URL does not parse
    /// - [`Error::Config`] if the scheme is not `ws` or `wss`
    /// - [`Error::WebSocket`] if the handshake fails
    pub async fn websocket(url: &str) -> Result<Self> {
        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "WebSocket URL must use ws:// or wss://, got: {url}"
            )));
        }

        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        info!(url = %url, "WebSocket connection established");

        Ok(Self::from_websocket(ws_stream))
    }

    /// Wraps an already established WebSocket stream.
    #[must_use]
    pub fn from_websocket<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws_stream.split();
        Self::new(WebSocketReader { stream }, WebSocketWriter { sink, closed: false })
    }
}

// ============================================================================
// WebSocketReader
// ============================================================================

/// Read half of a WebSocket transport.
pub struct WebSocketReader<S> {
    stream: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> TransportReader for WebSocketReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),

                Some(Ok(Message::Close(_))) => {
                    debug!("WebSocket closed by remote");
                    return Ok(None);
                }

                Some(Err(e)) => return Err(e.into()),

                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }

                // Ignore Binary, Ping, Pong
                Some(Ok(_)) => trace!("Ignoring non-text WebSocket frame"),
            }
        }
    }
}

// ============================================================================
// WebSocketWriter
// ============================================================================

/// Write half of a WebSocket transport.
pub struct WebSocketWriter<S> {
    sink: SplitSink<WebSocketStream<S>, Message>,
    closed: bool,
}

#[async_trait]
impl<S> TransportWriter for WebSocketWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.sink.send(Message::Text(frame.to_owned().into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink.close().await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
