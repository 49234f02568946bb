//! Builder pattern for connection configuration.
//!
//! Provides a fluent API for configuring and creating [`Connection`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use cdp_webdriver::Connection;
//!
//! # async fn example() -> cdp_webdriver::Result<()> {
//! let connection = Connection::builder()
//!     .command_timeout(Duration::from_secs(10))
//!     .connect("ws://127.0.0.1:9222/devtools/browser/abc")
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{Connection, PipeTransport, Transport, WebSocketTransport};

use super::ConnectionOptions;

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ConnectionBuilder {
    options: ConnectionOptions,
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl ConnectionBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces all options at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Delays every inbound message by `delay`.
    #[inline]
    #[must_use]
    pub fn slow_mo(mut self, delay: Duration) -> Self {
        self.options.slow_mo = Some(delay);
        self
    }

    /// Sets the per-command timeout.
    #[inline]
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.options.command_timeout = Some(timeout);
        self
    }

    /// Disables the per-command timeout.
    #[inline]
    #[must_use]
    pub fn no_command_timeout(mut self) -> Self {
        self.options.command_timeout = None;
        self
    }

    /// Sets the in-flight command limit.
    #[inline]
    #[must_use]
    pub fn max_pending_commands(mut self, max: usize) -> Self {
        self.options.max_pending_commands = max;
        self
    }

    /// Connects to a DevTools WebSocket endpoint.
    ///
    /// # Arguments
    ///
    /// * `ws_url` - Endpoint URL (e.g., `ws://127.0.0.1:9222/devtools/browser/<id>`)
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the options or URL are invalid
    /// - [`Error::Connection`] if the WebSocket cannot be opened
    pub async fn connect(self, ws_url: &str) -> Result<Connection> {
        self.options.validate()?;
        let url = validate_ws_url(ws_url)?;

        let transport = WebSocketTransport::connect(url.as_str()).await?;
        Connection::from_transport(transport, self.options)
    }

    /// Speaks NUL-delimited frames over a writer/reader pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid or no tokio
    /// runtime is available.
    pub fn pipe<W, R>(self, writer: W, reader: R) -> Result<Connection>
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.transport(PipeTransport::new(writer, reader))
    }

    /// Uses any custom [`Transport`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid or no tokio
    /// runtime is available.
    pub fn transport<T: Transport>(self, transport: T) -> Result<Connection> {
        Connection::from_transport(transport, self.options)
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Parses a DevTools endpoint URL, accepting only `ws` and `wss`.
fn validate_ws_url(ws_url: &str) -> Result<Url> {
    let url = Url::parse(ws_url)
        .map_err(|e| Error::config(format!("Invalid WebSocket URL '{ws_url}': {e}")))?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(Error::config(format!(
            "Unsupported URL scheme '{other}'. Expected ws:// or wss://\n\
             Example: Connection::builder().connect(\"ws://127.0.0.1:9222/devtools/browser/<id>\")"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
