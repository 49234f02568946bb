//! Type-safe identifiers for protocol entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Wire form | Assigned by |
//! |------|-----------|-------------|
//! | [`CommandId`] | unsigned integer | [`Connection`](crate::Connection) |
//! | [`SessionId`] | opaque string | browser (`Target.attachedToTarget`) |
//! | [`TargetId`] | opaque string | browser |
//! | [`FrameId`] | opaque string | browser |
//! | [`LoaderId`] | opaque string | browser, once per new document |
//! | [`ExecutionContextId`] | signed integer | browser |
//! | [`FrameKey`] | - | [`FrameManager`](crate::FrameManager), never reused |
//! | [`SubscriptionId`] | - | [`EventBus`](crate::events::EventBus) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// String Identifiers
// ============================================================================

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from its wire value.
            #[inline]
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the wire value.
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns `true` if the wire value is empty.
            #[inline]
            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id! {
    /// Session identifier assigned by the browser when a target is attached.
    SessionId
}

string_id! {
    /// Remote target identifier (page, iframe, worker).
    TargetId
}

string_id! {
    /// Frame identifier as reported by the `Page` domain.
    ///
    /// A main frame may change its `FrameId` on cross-process navigation;
    /// use [`FrameKey`] for a stable handle.
    FrameId
}

string_id! {
    /// Document loader identifier.
    ///
    /// Changes exactly once per new-document navigation.
    LoaderId
}

// ============================================================================
// CommandId
// ============================================================================

/// Command identifier used for request/response correlation.
///
/// Connection-global, strictly increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(u64);

impl CommandId {
    /// Creates a command ID from its wire value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ExecutionContextId
// ============================================================================

/// Runtime execution context identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContextId(i64);

impl ExecutionContextId {
    /// Creates a context ID from its wire value.
    #[inline]
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the wire value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ExecutionContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// FrameKey
// ============================================================================

/// Stable arena key for a tracked frame.
///
/// Survives main-frame re-keying on cross-process navigation. Keys are
/// never reused, so a key whose frame was removed simply resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameKey(u64);

impl FrameKey {
    #[inline]
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for FrameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

/// Identifier of an event bus subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    #[inline]
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_id_serializes_transparently() {
        let id = SessionId::new("ABC123");
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"ABC123\"");

        let parsed: FrameId = serde_json::from_str("\"F1\"").expect("parse");
        assert_eq!(parsed.as_str(), "F1");
    }

    #[test]
    fn test_command_id_ordering() {
        assert!(CommandId::new(1) < CommandId::new(2));
        assert_eq!(CommandId::new(7).to_string(), "7");
    }

    #[test]
    fn test_loader_id_empty() {
        assert!(LoaderId::new("").is_empty());
        assert!(!LoaderId::from("L1").is_empty());
    }

    #[test]
    fn test_frame_key_display() {
        assert_eq!(FrameKey::new(3).to_string(), "#3");
    }
}
