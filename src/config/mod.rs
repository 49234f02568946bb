//! Configuration types.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | [`ConnectionBuilder`] fluent constructor |
//! | `navigation` | [`TimeoutSettings`] and [`NavigateOptions`] |
//! | `options` | [`ConnectionOptions`] |

// ============================================================================
// Submodules
// ============================================================================

/// Connection builder.
pub mod builder;

/// Navigation timeouts and options.
pub mod navigation;

/// Connection options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionBuilder;
pub use navigation::{DEFAULT_NAVIGATION_TIMEOUT, NavigateOptions, TimeoutSettings};
pub use options::{ConnectionOptions, DEFAULT_COMMAND_TIMEOUT, DEFAULT_MAX_PENDING_COMMANDS};
