//! Stream transport with NUL-delimited framing.
//!
//! Browsers launched with `--remote-debugging-pipe` speak the protocol over
//! a pair of file descriptors. Every message is one JSON document followed
//! by a single `\0` byte.
//!
//! Any `AsyncWrite`/`AsyncRead` pair works, which also makes this the
//! transport of choice for in-process tests over [`tokio::io::duplex`].

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::error::Result;

use super::{Transport, TransportSink, TransportSource};

// ============================================================================
// Constants
// ============================================================================

/// Frame delimiter.
const DELIMITER: u8 = 0;

// ============================================================================
// PipeTransport
// ============================================================================

/// A writer/reader pair speaking NUL-delimited frames.
///
/// # Example
///
/// ```ignore
/// let (local, remote) = tokio::io::duplex(64 * 1024);
/// let (reader, writer) = tokio::io::split(local);
/// let connection = Connection::builder().pipe(writer, reader)?;
/// ```
#[derive(Debug)]
pub struct PipeTransport<W, R> {
    writer: W,
    reader: R,
}

impl<W, R> PipeTransport<W, R>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Creates a transport from the outbound writer and inbound reader.
    #[must_use]
    pub fn new(writer: W, reader: R) -> Self {
        Self { writer, reader }
    }
}

impl<W, R> Transport for PipeTransport<W, R>
where
    W: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
{
    type Sink = PipeSink<W>;
    type Source = PipeSource<R>;

    fn split(self) -> (Self::Sink, Self::Source) {
        (
            PipeSink {
                writer: self.writer,
            },
            PipeSource {
                reader: BufReader::new(self.reader),
                buffer: Vec::new(),
            },
        )
    }
}

// ============================================================================
// PipeSink
// ============================================================================

/// Outbound half of a [`PipeTransport`].
#[derive(Debug)]
pub struct PipeSink<W> {
    writer: W,
}

#[async_trait]
impl<W> TransportSink for PipeSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&mut self, message: String) -> Result<()> {
        self.writer.write_all(message.as_bytes()).await?;
        self.writer.write_all(&[DELIMITER]).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

// ============================================================================
// PipeSource
// ============================================================================

/// Inbound half of a [`PipeTransport`].
///
/// Partially read frames survive in `buffer`, so `recv` can be cancelled
/// and resumed without losing bytes.
#[derive(Debug)]
pub struct PipeSource<R> {
    reader: BufReader<R>,
    buffer: Vec<u8>,
}

#[async_trait]
impl<R> TransportSource for PipeSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.reader.read_until(DELIMITER, &mut self.buffer).await {
                Ok(0) => {
                    if !self.buffer.is_empty() {
                        debug!(
                            bytes = self.buffer.len(),
                            "Discarding unterminated frame at end of stream"
                        );
                        self.buffer.clear();
                    }
                    return None;
                }

                Ok(_) => {
                    if self.buffer.last() != Some(&DELIMITER) {
                        // EOF inside a frame; the next read reports it.
                        continue;
                    }

                    let mut frame = std::mem::take(&mut self.buffer);
                    frame.pop();

                    if frame.is_empty() {
                        continue;
                    }

                    match String::from_utf8(frame) {
                        Ok(text) => return Some(Ok(text)),
                        Err(e) => {
                            warn!(error = %e, "Dropping frame with invalid UTF-8");
                        }
                    }
                }

                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
