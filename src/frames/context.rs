//! Execution contexts.
//!
//! Every frame has at most one live context per [`World`]. A creation event
//! for an occupied (frame, world) slot replaces the previous context
//! outright: handles into the old one observe it as destroyed.
//!
//! Context IDs are only unique per session, so the registry keys every
//! context by the session that announced it. Out-of-process frames report
//! their contexts on their own session and evaluate through it.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::{ExecutionContextId, FrameKey, SessionId};
use crate::transport::CommandChannel;

// ============================================================================
// Constants
// ============================================================================

/// Protocol error suffixes meaning the target context is gone.
const CONTEXT_GONE_SUFFIXES: [&str; 2] = [
    "Cannot find context with specified id",
    "Inspected target navigated or closed",
];

/// Protocol error fragment meaning the context was torn down mid-call.
const CONTEXT_DESTROYED_FRAGMENT: &str = "Execution context was destroyed";

// ============================================================================
// World
// ============================================================================

/// Script world a context belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum World {
    /// The page's own world.
    Main,
    /// A named isolated world.
    Isolated(String),
}

impl fmt::Display for World {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Isolated(name) => write!(f, "isolated:{name}"),
        }
    }
}

// ============================================================================
// ContextEntry
// ============================================================================

/// Registry key: announcing session plus context ID.
type ContextKey = (Option<SessionId>, ExecutionContextId);

/// Registry record of a live context.
pub(crate) struct ContextEntry {
    pub(crate) id: ExecutionContextId,
    pub(crate) frame: Option<FrameKey>,
    pub(crate) world: Option<World>,
    pub(crate) origin: String,
    /// Channel the context was announced on; evaluation goes through it.
    client: Arc<dyn CommandChannel>,
    destroyed_tx: watch::Sender<bool>,
}

impl fmt::Debug for ContextEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextEntry")
            .field("id", &self.id)
            .field("frame", &self.frame)
            .field("world", &self.world)
            .field("session", &self.client.session_id())
            .finish()
    }
}

impl ContextEntry {
    fn key(&self) -> ContextKey {
        (self.client.session_id().cloned(), self.id)
    }

    fn mark_destroyed(&self) {
        self.destroyed_tx.send_replace(true);
    }

    /// Creates a handle bound to the announcing channel.
    pub(crate) fn handle(&self) -> ExecutionContext {
        ExecutionContext {
            id: self.id,
            frame: self.frame,
            world: self.world.clone(),
            origin: self.origin.clone(),
            client: Arc::clone(&self.client),
            destroyed: self.destroyed_tx.subscribe(),
        }
    }
}

// ============================================================================
// ContextRegistry
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct ContextRegistry {
    by_id: FxHashMap<ContextKey, ContextEntry>,
    by_frame: FxHashMap<(FrameKey, World), ContextKey>,
}

impl ContextRegistry {
    /// Registers a context announced on `client`.
    ///
    /// Returns the IDs of contexts it replaced.
    pub(crate) fn create(
        &mut self,
        id: ExecutionContextId,
        client: Arc<dyn CommandChannel>,
        frame: Option<FrameKey>,
        world: Option<World>,
        origin: String,
    ) -> Vec<ExecutionContextId> {
        let mut replaced = Vec::new();
        let key: ContextKey = (client.session_id().cloned(), id);

        if self.destroy(key.0.as_ref(), id).is_some() {
            replaced.push(id);
        }

        if let (Some(frame), Some(world)) = (frame, world.clone())
            && let Some(old_key) = self.by_frame.insert((frame, world), key.clone())
            && let Some(old) = self.by_id.remove(&old_key)
        {
            old.mark_destroyed();
            replaced.push(old.id);
        }

        let (destroyed_tx, _) = watch::channel(false);
        self.by_id.insert(
            key,
            ContextEntry {
                id,
                frame,
                world,
                origin,
                client,
                destroyed_tx,
            },
        );

        replaced
    }

    /// Removes and invalidates one context of session `scope`.
    pub(crate) fn destroy(
        &mut self,
        scope: Option<&SessionId>,
        id: ExecutionContextId,
    ) -> Option<ContextEntry> {
        let key: ContextKey = (scope.cloned(), id);
        let entry = self.by_id.remove(&key)?;

        if let (Some(frame), Some(world)) = (entry.frame, entry.world.clone()) {
            let slot = (frame, world);
            if self.by_frame.get(&slot) == Some(&key) {
                self.by_frame.remove(&slot);
            }
        }

        entry.mark_destroyed();
        Some(entry)
    }

    /// Removes and invalidates every context of session `scope`.
    pub(crate) fn clear(&mut self, scope: Option<&SessionId>) -> Vec<ContextEntry> {
        let keys: Vec<ContextKey> = self
            .by_id
            .keys()
            .filter(|(session, _)| session.as_ref() == scope)
            .cloned()
            .collect();

        keys.into_iter()
            .filter_map(|(session, id)| self.destroy(session.as_ref(), id))
            .collect()
    }

    /// Removes and invalidates the contexts of one frame.
    pub(crate) fn remove_frame(&mut self, frame: FrameKey) -> Vec<ContextEntry> {
        let keys: Vec<ContextKey> = self
            .by_id
            .values()
            .filter(|e| e.frame == Some(frame))
            .map(ContextEntry::key)
            .collect();

        keys.into_iter()
            .filter_map(|(session, id)| self.destroy(session.as_ref(), id))
            .collect()
    }

    #[inline]
    pub(crate) fn get(
        &self,
        scope: Option<&SessionId>,
        id: ExecutionContextId,
    ) -> Option<&ContextEntry> {
        self.by_id.get(&(scope.cloned(), id))
    }

    /// Returns the live context of `frame` in `world`.
    pub(crate) fn for_frame(&self, frame: FrameKey, world: &World) -> Option<&ContextEntry> {
        let id = self.by_frame.get(&(frame, world.clone()))?;
        self.by_id.get(id)
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }
}

// ============================================================================
// ExecutionContext
// ============================================================================

/// Handle to a script execution context.
///
/// Stays valid until the context is destroyed (navigation, frame detach,
/// or replacement). After that every call fails with
/// [`Error::ContextDestroyed`]; re-resolve the frame's current context and
/// retry.
#[derive(Clone)]
pub struct ExecutionContext {
    id: ExecutionContextId,
    frame: Option<FrameKey>,
    world: Option<World>,
    origin: String,
    client: Arc<dyn CommandChannel>,
    destroyed: watch::Receiver<bool>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("frame", &self.frame)
            .field("world", &self.world)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl ExecutionContext {
    /// Returns the context ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ExecutionContextId {
        self.id
    }

    /// Returns the owning frame, if known.
    #[inline]
    #[must_use]
    pub fn frame(&self) -> Option<FrameKey> {
        self.frame
    }

    /// Returns the world, `None` for contexts not tied to a frame world.
    #[inline]
    #[must_use]
    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    /// Returns the security origin.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Returns `true` once the context was destroyed.
    #[inline]
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        *self.destroyed.borrow()
    }

    /// Evaluates `expression` and returns its JSON value.
    ///
    /// Promises are awaited. `undefined` maps to `null`; values JSON cannot
    /// represent (`NaN`, `-0`, `1n`, ...) come back as strings.
    ///
    /// # Errors
    ///
    /// - [`Error::ContextDestroyed`] if the context is or becomes destroyed
    /// - [`Error::Evaluation`] if the script throws
    /// - [`Error::Protocol`] for other protocol failures
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let mut destroyed = self.destroyed.clone();
        if *destroyed.borrow() {
            return Err(Error::context_destroyed(self.id));
        }

        let params = json!({
            "expression": expression,
            "contextId": self.id,
            "returnByValue": true,
            "awaitPromise": true,
        });

        let response = tokio::select! {
            response = self.client.send("Runtime.evaluate", params) => response,
            _ = destroyed.wait_for(|d| *d) => {
                debug!(context = %self.id, "Context destroyed during evaluation");
                return Err(Error::context_destroyed(self.id));
            }
        };

        let response = response.map_err(|e| self.rewrite_error(e))?;

        if let Some(details) = response.get("exceptionDetails") {
            return Err(Error::evaluation(exception_message(details)));
        }

        Ok(remote_value(response.get("result")))
    }

    fn rewrite_error(&self, error: Error) -> Error {
        match &error {
            Error::Protocol { message, .. } if is_context_gone(message) => {
                Error::context_destroyed(self.id)
            }
            _ => error,
        }
    }
}

/// Returns `true` for protocol messages meaning the context no longer exists.
fn is_context_gone(message: &str) -> bool {
    CONTEXT_GONE_SUFFIXES.iter().any(|s| message.ends_with(s))
        || message.contains(CONTEXT_DESTROYED_FRAGMENT)
}

/// Extracts a readable message from `exceptionDetails`.
fn exception_message(details: &Value) -> String {
    details
        .pointer("/exception/description")
        .and_then(Value::as_str)
        .or_else(|| details.get("text").and_then(Value::as_str))
        .unwrap_or("Uncaught exception")
        .to_string()
}

/// Converts a by-value `RemoteObject` into JSON.
fn remote_value(object: Option<&Value>) -> Value {
    let Some(object) = object else {
        return Value::Null;
    };

    if let Some(value) = object.get("value") {
        return value.clone();
    }

    object
        .get("unserializableValue")
        .cloned()
        .unwrap_or(Value::Null)
}

// ============================================================================
// Tests
// ============================================================================
