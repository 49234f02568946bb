//! WebSocket transport.
//!
//! The browser exposes its DevTools endpoint as
//! `ws://HOST:PORT/devtools/browser/<id>`. Each protocol message travels in
//! one text frame.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::{Transport, TransportSink, TransportSource};

// ============================================================================
// WebSocketTransport
// ============================================================================

/// A WebSocket carrying one protocol message per text frame.
///
/// # Example
///
/// ```ignore
/// use cdp_webdriver::transport::WebSocketTransport;
///
/// let transport = WebSocketTransport::connect("ws://127.0.0.1:9222/devtools/browser/abc").await?;
/// let connection = Connection::from_transport(transport, ConnectionOptions::default())?;
/// ```
#[derive(Debug)]
pub struct WebSocketTransport<S> {
    stream: WebSocketStream<S>,
}

impl WebSocketTransport<MaybeTlsStream<TcpStream>> {
    /// Opens a client connection to a DevTools endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the TCP connect or upgrade fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect to {url} failed: {e}")))?;

        info!(url, status = %response.status(), "WebSocket connection established");

        Ok(Self { stream })
    }
}

impl<S> WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an already-upgraded stream.
    #[must_use]
    pub fn from_stream(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }
}

impl<S> Transport for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Sink = WebSocketSink<S>;
    type Source = WebSocketSource<S>;

    fn split(self) -> (Self::Sink, Self::Source) {
        let (write, read) = self.stream.split();
        (WebSocketSink { write }, WebSocketSource { read })
    }
}

// ============================================================================
// WebSocketSink
// ============================================================================

/// Outbound half of a [`WebSocketTransport`].
#[derive(Debug)]
pub struct WebSocketSink<S> {
    write: SplitSink<WebSocketStream<S>, Message>,
}

#[async_trait]
impl<S> TransportSink for WebSocketSink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: String) -> Result<()> {
        self.write.send(Message::Text(message.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.write.close().await?;
        Ok(())
    }
}

// ============================================================================
// WebSocketSource
// ============================================================================

/// Inbound half of a [`WebSocketTransport`].
#[derive(Debug)]
pub struct WebSocketSource<S> {
    read: SplitStream<WebSocketStream<S>>,
}

#[async_trait]
impl<S> TransportSource for WebSocketSource<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),

                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => warn!(error = %e, "Dropping binary frame with invalid UTF-8"),
                },

                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "WebSocket closed by remote");
                    return None;
                }

                // Ping, Pong, raw frames
                Some(Ok(_)) => {}

                Some(Err(e)) => return Some(Err(e.into())),

                None => return None,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
