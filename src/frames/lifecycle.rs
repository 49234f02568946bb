//! Lifecycle milestones.
//!
//! | User-facing name | Protocol event name |
//! |------------------|---------------------|
//! | `load` | `load` |
//! | `domcontentloaded` | `DOMContentLoaded` |
//! | `networkidle0` | `networkIdle` |
//! | `networkidle2` | `networkAlmostIdle` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

// ============================================================================
// LifecycleMilestone
// ============================================================================

/// A page-load stage a navigation wait can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleMilestone {
    /// `load` event fired.
    Load,
    /// `DOMContentLoaded` event fired.
    DomContentLoaded,
    /// No network connections for 500ms.
    NetworkIdle0,
    /// At most two network connections for 500ms.
    NetworkIdle2,
}

impl LifecycleMilestone {
    /// All milestones.
    pub const ALL: [Self; 4] = [
        Self::Load,
        Self::DomContentLoaded,
        Self::NetworkIdle0,
        Self::NetworkIdle2,
    ];

    /// Name of the `Page.lifecycleEvent` that reports this milestone.
    #[inline]
    #[must_use]
    pub const fn protocol_name(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::NetworkIdle0 => "networkIdle",
            Self::NetworkIdle2 => "networkAlmostIdle",
        }
    }

    /// User-facing name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::DomContentLoaded => "domcontentloaded",
            Self::NetworkIdle0 => "networkidle0",
            Self::NetworkIdle2 => "networkidle2",
        }
    }
}

impl fmt::Display for LifecycleMilestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleMilestone {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == name)
            .ok_or_else(|| {
                Error::invalid_argument(format!(
                    "Unknown lifecycle milestone '{name}'. Expected one of: load, domcontentloaded, networkidle0, networkidle2"
                ))
            })
    }
}

/// Maps milestones to their protocol event names.
pub(crate) fn protocol_names(milestones: &[LifecycleMilestone]) -> Vec<&'static str> {
    milestones.iter().map(|m| m.protocol_name()).collect()
}

// ============================================================================
// Tests
// ============================================================================
