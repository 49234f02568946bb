//! CDP WebDriver - Chrome DevTools Protocol driver core.
//!
//! This library multiplexes DevTools sessions over one transport, keeps a
//! live frame tree per page, and waits for navigation milestones.
//!
//! # Architecture
//!
//! ```text
//! Transport ─► Connection ─► Session ─► FrameManager ─► LifecycleWatcher
//!  (ws/pipe)    (ids, demux)  (per target) (tree, contexts)  (one wait)
//! ```
//!
//! Key design principles:
//!
//! - Each [`Connection`] owns one event-loop task; inbound messages are
//!   applied strictly in arrival order
//! - Commands are matched to responses by ID, never by arrival order
//! - The [`FrameManager`] only publishes mutations; every
//!   [`LifecycleWatcher`] re-derives completion from current state
//! - Subscriptions unregister themselves when dropped
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cdp_webdriver::{Connection, FrameManager, NavigateOptions, Result, TargetId};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::connect("ws://127.0.0.1:9222/devtools/browser/abc").await?;
//!     let session = connection.create_session(&TargetId::new("page-target-id")).await?;
//!
//!     let frames = FrameManager::new(Arc::new(session));
//!     frames.initialize().await?;
//!
//!     if let Some(main) = frames.main_frame() {
//!         frames
//!             .navigate_frame(&main, "https://example.com", NavigateOptions::new())
//!             .await?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Connection options, builder, navigation options |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`events`] | Typed publish/subscribe bus |
//! | [`frames`] | Frame tree (out-of-process iframes included), execution contexts, lifecycle watcher |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Wire message types |
//! | [`transport`] | Transports, connection and sessions |

// ============================================================================
// Modules
// ============================================================================

/// Connection and navigation configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Typed event bus with self-unregistering handles.
pub mod events;

/// Frame tree, execution contexts and navigation waits.
pub mod frames;

/// Type-safe identifiers for protocol entities.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Protocol message types.
pub mod protocol;

/// Transport layer, connection and sessions.
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration types
pub use config::{ConnectionBuilder, ConnectionOptions, NavigateOptions, TimeoutSettings};

// Error types
pub use error::{Error, Result};

// Event types
pub use events::{EventBus, Listener, Subscription};

// Frame types
pub use frames::{
    ExecutionContext, Expectation, FrameEvent, FrameInfo, FrameManager, LifecycleMilestone,
    LifecycleWatcher, NavigationOutcome, World,
};

// Identifier types
pub use identifiers::{
    CommandId, ExecutionContextId, FrameId, FrameKey, LoaderId, SessionId, SubscriptionId,
    TargetId,
};

// Protocol types
pub use protocol::{Event, ProtocolEvent, TargetInfo};

// Transport types
pub use transport::{CommandChannel, Connection, PipeTransport, Session, WebSocketTransport};
