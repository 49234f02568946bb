//! Transport and dispatch layer.
//!
//! This module moves protocol messages between the local end (Rust) and
//! the browser, correlates responses with their commands and routes
//! session-scoped traffic to the right [`Session`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                               ┌──────────────────┐
//! │  Connection      │   WebSocket or NUL-framed     │  Browser         │
//! │   ├─ Session S1  │◄─────────────────────────────►│  (DevTools)      │
//! │   └─ Session S2  │          pipe                 │                  │
//! └──────────────────┘                               └──────────────────┘
//! ```
//!
//! One event-loop task per connection owns the transport. Inbound messages
//! are dispatched one at a time, in arrival order, on that task.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `channel` | [`CommandChannel`] seam shared by connections and sessions |
//! | `connection` | Root connection and event loop |
//! | `pending` | Pending-command table |
//! | `pipe` | NUL-delimited stream transport |
//! | `session` | Per-target session channel |
//! | `websocket` | WebSocket transport |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Command channel abstraction.
pub mod channel;

/// Root connection and event loop.
pub mod connection;

/// Pending-command bookkeeping.
pub(crate) mod pending;

/// Stream transport with NUL-delimited framing.
pub mod pipe;

/// Per-target sessions.
pub mod session;

/// WebSocket transport.
pub mod websocket;

// ============================================================================
// Transport Traits
// ============================================================================

/// Outbound half of a transport.
#[async_trait]
pub trait TransportSink: Send + 'static {
    /// Writes one complete message.
    async fn send(&mut self, message: String) -> Result<()>;

    /// Closes the outbound half.
    async fn close(&mut self) -> Result<()>;
}

/// Inbound half of a transport.
#[async_trait]
pub trait TransportSource: Send + 'static {
    /// Reads the next complete message.
    ///
    /// Returns `None` once the remote end has closed. Must be cancel safe:
    /// the event loop polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<String>>;
}

/// A bidirectional message transport.
pub trait Transport: Send + 'static {
    /// Outbound half.
    type Sink: TransportSink;
    /// Inbound half.
    type Source: TransportSource;

    /// Splits the transport into independently owned halves.
    fn split(self) -> (Self::Sink, Self::Source);
}

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::CommandChannel;
pub use connection::Connection;
pub use pipe::{PipeSink, PipeSource, PipeTransport};
pub use session::Session;
pub use websocket::{WebSocketSink, WebSocketSource, WebSocketTransport};
