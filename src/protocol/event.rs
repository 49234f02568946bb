//! Event message types.
//!
//! Events are notifications sent by the browser when something happens on a
//! target. They carry no `id` and expect no reply.
//!
//! # Events Consumed by the Core
//!
//! | Domain | Events |
//! |--------|--------|
//! | `Target` | `attachedToTarget`, `detachedFromTarget` |
//! | `Page` | `frameAttached`, `frameNavigated`, `navigatedWithinDocument`, `frameDetached`, `frameStoppedLoading`, `lifecycleEvent` |
//! | `Runtime` | `executionContextCreated`, `executionContextDestroyed`, `executionContextsCleared` |
//!
//! Every other method parses to [`ProtocolEvent::Unknown`] and is still
//! delivered to subscribers untouched.

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::identifiers::{ExecutionContextId, FrameId, LoaderId, SessionId, TargetId};

// ============================================================================
// Event
// ============================================================================

/// An event notification from remote end to local end.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event name in `Domain.eventName` format.
    pub method: String,

    /// Event-specific data.
    pub params: Value,

    /// Session the event was emitted on.
    pub session_id: Option<SessionId>,
}

impl Event {
    /// Returns the domain name from the method.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let event = Event { method: "Page.lifecycleEvent".into(), .. };
    /// assert_eq!(event.domain(), "Page");
    /// ```
    #[inline]
    #[must_use]
    pub fn domain(&self) -> &str {
        self.method.split('.').next().unwrap_or_default()
    }

    /// Returns the event name from the method.
    #[inline]
    #[must_use]
    pub fn event_name(&self) -> &str {
        self.method.split('.').nth(1).unwrap_or_default()
    }

    /// Deserializes the params into `T`.
    #[must_use]
    pub fn params_as<T: DeserializeOwned>(&self) -> Option<T> {
        match serde_json::from_value(self.params.clone()) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(method = %self.method, error = %e, "Event params did not match schema");
                None
            }
        }
    }

    /// Parses the event into a typed variant.
    #[must_use]
    pub fn parse(&self) -> ProtocolEvent {
        let parsed = match self.method.as_str() {
            "Target.attachedToTarget" => self.params_as().map(ProtocolEvent::TargetAttached),
            "Target.detachedFromTarget" => self.params_as().map(ProtocolEvent::TargetDetached),
            "Page.frameAttached" => self.params_as().map(ProtocolEvent::FrameAttached),
            "Page.frameNavigated" => self.params_as().map(ProtocolEvent::FrameNavigated),
            "Page.navigatedWithinDocument" => {
                self.params_as().map(ProtocolEvent::NavigatedWithinDocument)
            }
            "Page.frameDetached" => self.params_as().map(ProtocolEvent::FrameDetached),
            "Page.frameStoppedLoading" => {
                self.params_as().map(ProtocolEvent::FrameStoppedLoading)
            }
            "Page.lifecycleEvent" => self.params_as().map(ProtocolEvent::LifecycleEvent),
            "Runtime.executionContextCreated" => {
                self.params_as().map(ProtocolEvent::ExecutionContextCreated)
            }
            "Runtime.executionContextDestroyed" => {
                self.params_as().map(ProtocolEvent::ExecutionContextDestroyed)
            }
            "Runtime.executionContextsCleared" => Some(ProtocolEvent::ExecutionContextsCleared),
            _ => None,
        };

        parsed.unwrap_or_else(|| ProtocolEvent::Unknown {
            method: self.method.clone(),
            params: self.params.clone(),
        })
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Target description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    /// Target ID.
    pub target_id: TargetId,
    /// Target type (`page`, `iframe`, `service_worker`, ...).
    #[serde(rename = "type")]
    pub target_type: String,
    /// Current URL.
    #[serde(default)]
    pub url: String,
    /// Current title.
    #[serde(default)]
    pub title: String,
}

/// `Target.attachedToTarget` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetAttached {
    /// New session.
    pub session_id: SessionId,
    /// Attached target.
    pub target_info: TargetInfo,
    /// Target is paused until `Runtime.runIfWaitingForDebugger`.
    #[serde(default)]
    pub waiting_for_debugger: bool,
}

/// `Target.detachedFromTarget` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDetached {
    /// Detached session.
    pub session_id: SessionId,
}

/// `Page.frameAttached` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameAttached {
    /// New frame.
    pub frame_id: FrameId,
    /// Parent frame.
    #[serde(default)]
    pub parent_frame_id: Option<FrameId>,
}

/// Frame description carried by navigation events and frame trees.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePayload {
    /// Frame ID.
    pub id: FrameId,
    /// Parent frame, absent for the main frame.
    #[serde(default)]
    pub parent_id: Option<FrameId>,
    /// Document loader.
    #[serde(default)]
    pub loader_id: Option<LoaderId>,
    /// Frame name attribute.
    #[serde(default)]
    pub name: Option<String>,
    /// Document URL without fragment.
    #[serde(default)]
    pub url: String,
    /// Fragment including the leading `#`.
    #[serde(default)]
    pub url_fragment: Option<String>,
}

impl FramePayload {
    /// Returns the full URL including the fragment.
    #[must_use]
    pub fn full_url(&self) -> String {
        match &self.url_fragment {
            Some(fragment) => format!("{}{}", self.url, fragment),
            None => self.url.clone(),
        }
    }
}

/// `Page.frameNavigated` params.
#[derive(Debug, Clone, Deserialize)]
pub struct FrameNavigated {
    /// Navigated frame.
    pub frame: FramePayload,
}

/// Recursive frame tree returned by `Page.getFrameTree`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTreePayload {
    /// This frame.
    pub frame: FramePayload,
    /// Child subtrees.
    #[serde(default)]
    pub child_frames: Vec<FrameTreePayload>,
}

/// `Page.navigatedWithinDocument` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigatedWithinDocument {
    /// Frame ID.
    pub frame_id: FrameId,
    /// New URL.
    pub url: String,
}

/// `Page.frameDetached` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameDetached {
    /// Frame ID.
    pub frame_id: FrameId,
    /// `remove` or `swap`.
    #[serde(default)]
    pub reason: Option<String>,
}

impl FrameDetached {
    /// Returns `true` if the frame moved to another process instead of
    /// being removed.
    #[inline]
    #[must_use]
    pub fn is_swap(&self) -> bool {
        self.reason.as_deref() == Some("swap")
    }
}

/// `Page.frameStoppedLoading` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStoppedLoading {
    /// Frame ID.
    pub frame_id: FrameId,
}

/// `Page.lifecycleEvent` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    /// Frame ID.
    pub frame_id: FrameId,
    /// Loader the milestone belongs to.
    #[serde(default)]
    pub loader_id: Option<LoaderId>,
    /// Milestone name (`init`, `DOMContentLoaded`, `load`, ...).
    pub name: String,
}

/// Extra data attached to an execution context.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAuxData {
    /// Owning frame.
    #[serde(default)]
    pub frame_id: Option<FrameId>,
    /// `true` for the frame's main world.
    #[serde(default)]
    pub is_default: bool,
    /// `default`, `isolated` or `worker`.
    #[serde(default, rename = "type")]
    pub context_type: Option<String>,
}

/// Execution context description.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    /// Context ID.
    pub id: ExecutionContextId,
    /// Security origin.
    #[serde(default)]
    pub origin: String,
    /// World name (empty for the main world).
    #[serde(default)]
    pub name: String,
    /// Frame association.
    #[serde(default)]
    pub aux_data: Option<ContextAuxData>,
}

/// `Runtime.executionContextCreated` params.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionContextCreated {
    /// New context.
    pub context: ExecutionContextDescription,
}

/// `Runtime.executionContextDestroyed` params.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDestroyed {
    /// Destroyed context.
    pub execution_context_id: ExecutionContextId,
}

// ============================================================================
// ProtocolEvent
// ============================================================================

/// Parsed event types for type-safe handling.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// Session created.
    TargetAttached(TargetAttached),
    /// Session destroyed.
    TargetDetached(TargetDetached),
    /// Frame attached to the tree.
    FrameAttached(FrameAttached),
    /// Frame committed a new document.
    FrameNavigated(FrameNavigated),
    /// Fragment or history API navigation.
    NavigatedWithinDocument(NavigatedWithinDocument),
    /// Frame removed or swapped.
    FrameDetached(FrameDetached),
    /// Frame finished loading.
    FrameStoppedLoading(FrameStoppedLoading),
    /// Lifecycle milestone reached.
    LifecycleEvent(LifecycleEvent),
    /// Execution context created.
    ExecutionContextCreated(ExecutionContextCreated),
    /// Execution context destroyed.
    ExecutionContextDestroyed(ExecutionContextDestroyed),
    /// All execution contexts destroyed.
    ExecutionContextsCleared,
    /// Any other event, or a known one with unexpected params.
    Unknown {
        /// Event method.
        method: String,
        /// Event params.
        params: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(method: &str, params: Value) -> Event {
        Event {
            method: method.to_string(),
            params,
            session_id: None,
        }
    }

    #[test]
    fn test_domain_and_name() {
        let e = event("Page.lifecycleEvent", json!({}));
        assert_eq!(e.domain(), "Page");
        assert_eq!(e.event_name(), "lifecycleEvent");
    }

    #[test]
    fn test_parse_attached_to_target() {
        let e = event(
            "Target.attachedToTarget",
            json!({
                "sessionId": "S1",
                "targetInfo": {"targetId": "T1", "type": "page", "url": "about:blank"},
                "waitingForDebugger": false
            }),
        );

        let ProtocolEvent::TargetAttached(attached) = e.parse() else {
            panic!("expected TargetAttached");
        };
        assert_eq!(attached.session_id.as_str(), "S1");
        assert_eq!(attached.target_info.target_type, "page");
    }

    #[test]
    fn test_parse_frame_navigated_with_fragment() {
        let e = event(
            "Page.frameNavigated",
            json!({"frame": {
                "id": "F1", "loaderId": "L1", "url": "https://a.test/", "urlFragment": "#x"
            }}),
        );

        let ProtocolEvent::FrameNavigated(navigated) = e.parse() else {
            panic!("expected FrameNavigated");
        };
        assert!(navigated.frame.parent_id.is_none());
        assert_eq!(navigated.frame.full_url(), "https://a.test/#x");
    }

    #[test]
    fn test_parse_lifecycle_event() {
        let e = event(
            "Page.lifecycleEvent",
            json!({"frameId": "F1", "loaderId": "L2", "name": "load", "timestamp": 3.0}),
        );
        let ProtocolEvent::LifecycleEvent(lifecycle) = e.parse() else {
            panic!("expected LifecycleEvent");
        };
        assert_eq!(lifecycle.name, "load");
        assert_eq!(lifecycle.loader_id, Some(LoaderId::new("L2")));
    }

    #[test]
    fn test_parse_context_created() {
        let e = event(
            "Runtime.executionContextCreated",
            json!({"context": {
                "id": 5, "origin": "https://a.test", "name": "",
                "auxData": {"frameId": "F1", "isDefault": true, "type": "default"}
            }}),
        );
        let ProtocolEvent::ExecutionContextCreated(created) = e.parse() else {
            panic!("expected ExecutionContextCreated");
        };
        let aux = created.context.aux_data.expect("aux data");
        assert!(aux.is_default);
        assert_eq!(aux.frame_id, Some(FrameId::new("F1")));
    }

    #[test]
    fn test_frame_detached_swap() {
        let e = event("Page.frameDetached", json!({"frameId": "F2", "reason": "swap"}));
        let ProtocolEvent::FrameDetached(detached) = e.parse() else {
            panic!("expected FrameDetached");
        };
        assert!(detached.is_swap());
    }

    #[test]
    fn test_unknown_and_malformed_fall_through() {
        let e = event("Network.requestWillBeSent", json!({"requestId": "1"}));
        assert!(matches!(e.parse(), ProtocolEvent::Unknown { .. }));

        let e = event("Page.frameAttached", json!({"nope": 1}));
        assert!(matches!(e.parse(), ProtocolEvent::Unknown { .. }));
    }
}
