//! Frame tracking and navigation waits.
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tree` | Frame arena keyed by [`FrameKey`](crate::identifiers::FrameKey) |
//! | `context` | Execution contexts per frame and world |
//! | `manager` | [`FrameManager`], protocol event replay |
//! | `watcher` | [`LifecycleWatcher`], milestone waits |
//! | `lifecycle` | [`LifecycleMilestone`] vocabulary |

// ============================================================================
// Submodules
// ============================================================================

pub mod context;
pub mod lifecycle;
pub mod manager;
pub mod tree;
pub mod watcher;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{ExecutionContext, World};
pub use lifecycle::LifecycleMilestone;
pub use manager::{FrameEvent, FrameManager, UTILITY_WORLD_NAME};
pub use tree::FrameInfo;
pub use watcher::{Expectation, LifecycleWatcher, NavigationOutcome};
