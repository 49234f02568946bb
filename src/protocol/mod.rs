//! Chrome DevTools Protocol message types.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Command` | Local → Remote | Method call with a connection-global `id` |
//! | `Response` | Remote → Local | Exactly one per command, matched by `id` |
//! | `Event` | Remote → Local | Asynchronous notification, no reply |
//!
//! Any of the three may carry a `sessionId`, scoping it to one attached
//! target. The core does not model the full method vocabulary: arbitrary
//! commands and events pass through as `method` + JSON `params`.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `event` | Event type and typed payloads for the events the core consumes |
//! | `request` | Command, Response and inbound classification |

// ============================================================================
// Submodules
// ============================================================================

/// Event message types.
pub mod event;

/// Command and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use event::{
    ContextAuxData, Event, ExecutionContextCreated, ExecutionContextDescription,
    ExecutionContextDestroyed, FrameAttached, FrameDetached, FrameNavigated, FramePayload,
    FrameStoppedLoading, FrameTreePayload, LifecycleEvent, NavigatedWithinDocument,
    ProtocolEvent, TargetAttached, TargetDetached, TargetInfo,
};
pub use request::{Command, ErrorPayload, Incoming, Response};
