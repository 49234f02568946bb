//! Connection options.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use cdp_webdriver::ConnectionOptions;
//!
//! let options = ConnectionOptions::new()
//!     .with_slow_mo(Duration::from_millis(50))
//!     .with_command_timeout(Duration::from_secs(10));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for a single command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit of in-flight commands per pending table.
pub const DEFAULT_MAX_PENDING_COMMANDS: usize = 1024;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Tunables applied to a [`Connection`](crate::Connection) and its sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Delay applied before processing each inbound message.
    pub slow_mo: Option<Duration>,

    /// Per-command timeout. `None` waits indefinitely.
    pub command_timeout: Option<Duration>,

    /// Maximum in-flight commands per connection or session.
    pub max_pending_commands: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options with default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slow_mo: None,
            command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
            max_pending_commands: DEFAULT_MAX_PENDING_COMMANDS,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Delays every inbound message by `delay`.
    #[inline]
    #[must_use]
    pub fn with_slow_mo(mut self, delay: Duration) -> Self {
        self.slow_mo = Some(delay);
        self
    }

    /// Sets the per-command timeout.
    #[inline]
    #[must_use]
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    /// Disables the per-command timeout.
    #[inline]
    #[must_use]
    pub fn without_command_timeout(mut self) -> Self {
        self.command_timeout = None;
        self
    }

    /// Sets the in-flight command limit.
    #[inline]
    #[must_use]
    pub fn with_max_pending_commands(mut self, max: usize) -> Self {
        self.max_pending_commands = max;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionOptions {
    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a zero command timeout or a zero
    /// pending-command limit.
    pub fn validate(&self) -> Result<()> {
        if self.command_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::config(
                "Command timeout must be greater than zero. Use without_command_timeout() to disable it.",
            ));
        }

        if self.max_pending_commands == 0 {
            return Err(Error::config(
                "max_pending_commands must be greater than zero",
            ));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
