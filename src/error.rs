//! Error types for the CDP driver core.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cdp_webdriver::{Error, Result};
//!
//! async fn example(session: &Session) -> Result<()> {
//!     match session.send("Page.reload", json!({})).await {
//!         Err(Error::TargetClosed { .. }) => Ok(()),
//!         other => other.map(|_| ()),
//!     }
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::TargetClosed`] |
//! | Protocol | [`Error::Protocol`], [`Error::CommandTimeout`], [`Error::TooManyPendingCommands`], [`Error::Malformed`] |
//! | Waiting | [`Error::Timeout`] |
//! | Navigation | [`Error::NavigationTimeout`], [`Error::NavigationTerminated`], [`Error::NavigationFailed`] |
//! | Execution | [`Error::ContextDestroyed`], [`Error::Evaluation`] |
//! | Lookup | [`Error::SessionNotFound`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{ExecutionContextId, SessionId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when connection options or URLs are invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument supplied by the caller.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport could not be established or failed mid-flight.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The connection was already torn down when the command was issued.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The command's session or connection was torn down.
    ///
    /// Returned for commands pending at teardown and for commands sent on a
    /// detached session.
    #[error("Protocol error ({method}): Target closed.")]
    TargetClosed {
        /// Method of the command that could not complete.
        method: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// The browser answered a command with an error.
    #[error("Protocol error ({method}): {message}{}", data.as_deref().map(|d| format!(" {d}")).unwrap_or_default())]
    Protocol {
        /// Method of the failed command.
        method: String,
        /// Server diagnostic message.
        message: String,
        /// Optional server diagnostic data.
        data: Option<String>,
    },

    /// No response arrived within the command timeout.
    #[error("Command {method} timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// Method of the command.
        method: String,
        /// Milliseconds waited.
        timeout_ms: u64,
    },

    /// Pending table is full.
    #[error("Too many pending commands: {pending}/{max}")]
    TooManyPendingCommands {
        /// Current number of pending commands.
        pending: usize,
        /// Configured limit.
        max: usize,
    },

    /// Malformed or unexpected message shape.
    #[error("Malformed message: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },

    /// Operation timeout.
    ///
    /// Returned when a wait other than navigation exceeds its deadline.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Navigation Errors
    // ========================================================================
    /// Navigation wait deadline elapsed.
    #[error("Navigation timeout of {timeout_ms} ms exceeded (waiting for: {})", outstanding.join(", "))]
    NavigationTimeout {
        /// Configured timeout in milliseconds.
        timeout_ms: u64,
        /// Milestones still missing when the deadline hit.
        outstanding: Vec<String>,
    },

    /// The frame (or an ancestor) detached, or the browser disconnected.
    #[error("Navigation terminated: {reason}")]
    NavigationTerminated {
        /// Why the wait was cut short.
        reason: String,
    },

    /// `Page.navigate` reported a network-level failure.
    #[error("{error_text} at {url}")]
    NavigationFailed {
        /// Requested URL.
        url: String,
        /// Browser-provided error text.
        error_text: String,
    },

    // ========================================================================
    // Execution Errors
    // ========================================================================
    /// The target execution context no longer exists.
    ///
    /// Retry after re-resolving the frame's current context.
    #[error("Execution context {context_id} was destroyed, most likely because of a navigation")]
    ContextDestroyed {
        /// The destroyed context.
        context_id: ExecutionContextId,
    },

    /// Evaluated script threw.
    #[error("Evaluation failed: {message}")]
    Evaluation {
        /// Exception text.
        message: String,
    },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    /// Session not known to the connection.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The missing session ID.
        session_id: SessionId,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a target closed error.
    #[inline]
    pub fn target_closed(method: impl Into<String>) -> Self {
        Self::TargetClosed {
            method: method.into(),
        }
    }

    /// Creates a protocol error from a server error payload.
    #[inline]
    pub fn protocol(
        method: impl Into<String>,
        message: impl Into<String>,
        data: Option<String>,
    ) -> Self {
        Self::Protocol {
            method: method.into(),
            message: message.into(),
            data,
        }
    }

    /// Creates a command timeout error.
    #[inline]
    pub fn command_timeout(method: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CommandTimeout {
            method: method.into(),
            timeout_ms,
        }
    }

    /// Creates a malformed message error.
    #[inline]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a navigation timeout error.
    #[inline]
    pub fn navigation_timeout(timeout_ms: u64, outstanding: Vec<String>) -> Self {
        Self::NavigationTimeout {
            timeout_ms,
            outstanding,
        }
    }

    /// Creates a navigation terminated error.
    #[inline]
    pub fn navigation_terminated(reason: impl Into<String>) -> Self {
        Self::NavigationTerminated {
            reason: reason.into(),
        }
    }

    /// Creates a navigation failed error.
    #[inline]
    pub fn navigation_failed(url: impl Into<String>, error_text: impl Into<String>) -> Self {
        Self::NavigationFailed {
            url: url.into(),
            error_text: error_text.into(),
        }
    }

    /// Creates a context destroyed error.
    #[inline]
    pub fn context_destroyed(context_id: ExecutionContextId) -> Self {
        Self::ContextDestroyed { context_id }
    }

    /// Creates an evaluation error.
    #[inline]
    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::CommandTimeout { .. } | Self::Timeout { .. } | Self::NavigationTimeout { .. }
        )
    }

    /// Returns `true` if this error means the remote end went away.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::TargetClosed { .. }
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CommandTimeout { .. }
                | Self::Timeout { .. }
                | Self::NavigationTimeout { .. }
                | Self::ContextDestroyed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
