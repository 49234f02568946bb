//! Navigation timeouts and per-navigation options.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::Result;
use crate::frames::LifecycleMilestone;

// ============================================================================
// Constants
// ============================================================================

/// Default navigation timeout.
pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// TimeoutSettings
// ============================================================================

/// Default timeouts of a [`FrameManager`](crate::FrameManager).
///
/// A zero duration disables the corresponding timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutSettings {
    /// Navigation wait timeout.
    pub navigation: Duration,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeoutSettings {
    /// Creates settings with default timeouts.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            navigation: DEFAULT_NAVIGATION_TIMEOUT,
        }
    }

    /// Sets the navigation timeout.
    #[inline]
    #[must_use]
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation = timeout;
        self
    }
}

// ============================================================================
// NavigateOptions
// ============================================================================

/// Options for a single navigation or navigation wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigateOptions {
    /// Milestones that must fire in the frame and all descendants.
    ///
    /// An empty list resolves as soon as the navigation commits.
    pub wait_until: Vec<LifecycleMilestone>,

    /// Overrides the manager's navigation timeout.
    pub timeout: Option<Duration>,

    /// Referrer sent with `Page.navigate`.
    pub referer: Option<String>,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            wait_until: vec![LifecycleMilestone::Load],
            timeout: None,
            referer: None,
        }
    }
}

impl NavigateOptions {
    /// Creates options waiting for `load`.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the milestone list.
    #[must_use]
    pub fn wait_until(mut self, milestones: impl IntoIterator<Item = LifecycleMilestone>) -> Self {
        self.wait_until = milestones.into_iter().collect();
        self
    }

    /// Replaces the milestone list from user-facing names
    /// (`load`, `domcontentloaded`, `networkidle0`, `networkidle2`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`](crate::Error::InvalidArgument) for an unknown name.
    pub fn wait_until_names<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        self.wait_until = names
            .into_iter()
            .map(str::parse)
            .collect::<Result<Vec<LifecycleMilestone>>>()?;
        Ok(self)
    }

    /// Sets the timeout for this navigation.
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the referrer.
    #[inline]
    #[must_use]
    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::Error;

    #[test]
    fn test_defaults() {
        assert_eq!(TimeoutSettings::default().navigation, Duration::from_secs(30));

        let options = NavigateOptions::default();
        assert_eq!(options.wait_until, vec![LifecycleMilestone::Load]);
        assert!(options.timeout.is_none());
        assert!(options.referer.is_none());
    }

    #[test]
    fn test_wait_until_names() {
        let options = NavigateOptions::new()
            .wait_until_names(["domcontentloaded", "networkidle0"])
            .expect("valid names");
        assert_eq!(
            options.wait_until,
            vec![
                LifecycleMilestone::DomContentLoaded,
                LifecycleMilestone::NetworkIdle0
            ]
        );
    }

    #[test]
    fn test_wait_until_names_rejects_unknown() {
        let result = NavigateOptions::new().wait_until_names(["load", "networkidle"]);
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }
}
