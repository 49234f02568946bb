//! Frame tree and execution context tracking for one page target.
//!
//! The [`FrameManager`] replays `Page.*` and `Runtime.*` events from its
//! [`CommandChannel`] into a frame arena and a context registry. It never
//! decides that a navigation is complete: it publishes a [`FrameEvent`] for
//! every mutation and lets each [`LifecycleWatcher`] re-derive completion
//! from current state.
//!
//! # Event Mapping
//!
//! | Protocol event | Published |
//! |----------------|-----------|
//! | `Page.frameAttached` | `FrameAttached` |
//! | `Page.frameNavigated` | `FrameDetached` per old child, then `FrameNavigated` |
//! | `Page.navigatedWithinDocument` | `NavigatedWithinDocument`, `FrameNavigated` |
//! | `Page.frameDetached` | `FrameDetached` per removed frame, or `FrameSwapped` |
//! | `Page.frameStoppedLoading` | `LifecycleEvent` (`DOMContentLoaded`, `load`) |
//! | `Page.lifecycleEvent` | `LifecycleEvent` unless stale |
//! | `Runtime.executionContext*` | `ExecutionContextCreated` / `ExecutionContextDestroyed` |
//! | `Target.detachedFromTarget` (iframe) | `FrameDetached` per frame of the child session |
//!
//! # Out-of-Process Frames
//!
//! A cross-site iframe moves into its own renderer: the page session sees
//! `Page.frameDetached{reason: "swap"}` and then `Target.attachedToTarget`
//! for an `iframe` target whose ID is the frame ID. From then on the
//! frame's `Page.*` and `Runtime.*` events arrive on the child session
//! only. The manager adopts every such session into the same tree and
//! removes the frame's subtree when the session detaches, which is the only
//! removal signal an out-of-process frame gets.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Value, json};
use tracing::{debug, trace, warn};

use crate::config::{NavigateOptions, TimeoutSettings};
use crate::error::{Error, Result};
use crate::events::{EventBus, Listener, Subscription};
use crate::identifiers::{ExecutionContextId, FrameId, FrameKey, LoaderId, SessionId};
use crate::protocol::{
    ExecutionContextDescription, FrameDetached, FramePayload, FrameTreePayload, LifecycleEvent,
    ProtocolEvent, TargetAttached, TargetDetached,
};
use crate::transport::CommandChannel;

use super::context::{ContextEntry, ContextRegistry, ExecutionContext, World};
use super::tree::{AttachOutcome, FrameInfo, FrameTree, LifecycleOutcome};
use super::watcher::{Expectation, LifecycleWatcher, NavigationOutcome};

// ============================================================================
// Constants
// ============================================================================

/// Name of the isolated world the crate evaluates its own scripts in.
pub const UTILITY_WORLD_NAME: &str = "__cdp_webdriver_utility_world__";

/// Source URL tagging scripts injected by the crate.
const EVALUATION_SCRIPT_URL: &str = "cdp-webdriver://__evaluation_script__";

/// Target type of out-of-process iframes.
const IFRAME_TARGET_TYPE: &str = "iframe";

// ============================================================================
// FrameEvent
// ============================================================================

/// Frame tree mutation published by a [`FrameManager`].
#[derive(Debug, Clone)]
pub enum FrameEvent {
    /// Frame joined the tree.
    FrameAttached(FrameInfo),
    /// Frame committed a new document or changed URL.
    FrameNavigated(FrameInfo),
    /// Same-document navigation (fragment, history API).
    NavigatedWithinDocument(FrameInfo),
    /// Frame left the tree. Snapshot has `detached` set.
    FrameDetached(FrameInfo),
    /// Frame moved to another process; it stays in the tree.
    FrameSwapped(FrameInfo),
    /// Lifecycle milestone recorded for the frame's current document.
    LifecycleEvent {
        /// Frame the milestone fired in.
        frame: FrameKey,
        /// Protocol milestone name.
        name: String,
    },
    /// Execution context became available.
    ExecutionContextCreated {
        /// New context.
        context_id: ExecutionContextId,
        /// Owning frame, if any.
        frame: Option<FrameKey>,
        /// World of the context, if it belongs to one.
        world: Option<World>,
    },
    /// Execution context was invalidated.
    ExecutionContextDestroyed {
        /// Destroyed context.
        context_id: ExecutionContextId,
        /// Frame that owned it, if any.
        frame: Option<FrameKey>,
    },
}

impl FrameEvent {
    /// Returns the frame the event concerns.
    #[must_use]
    pub fn frame(&self) -> Option<FrameKey> {
        match self {
            Self::FrameAttached(info)
            | Self::FrameNavigated(info)
            | Self::NavigatedWithinDocument(info)
            | Self::FrameDetached(info)
            | Self::FrameSwapped(info) => Some(info.key),
            Self::LifecycleEvent { frame, .. } => Some(*frame),
            Self::ExecutionContextCreated { frame, .. }
            | Self::ExecutionContextDestroyed { frame, .. } => *frame,
        }
    }
}

// ============================================================================
// FrameState
// ============================================================================

/// State mutated on the dispatch path.
///
/// Handlers append the events to publish to `out`; the caller publishes them
/// after releasing the lock.
#[derive(Debug, Default)]
pub(crate) struct FrameState {
    pub(crate) tree: FrameTree,
    contexts: ContextRegistry,
}

impl FrameState {
    fn frame_attached(&mut self, id: &FrameId, parent: Option<&FrameId>, out: &mut Vec<FrameEvent>) {
        match self.tree.attach(id, parent) {
            AttachOutcome::Attached(key) => {
                trace!(frame = %id, %key, "Frame attached");
                out.extend(self.tree.info(key).map(FrameEvent::FrameAttached));
            }
            AttachOutcome::Duplicate(key) => {
                trace!(frame = %id, %key, "Duplicate frame attach ignored");
            }
            AttachOutcome::UnknownParent => {
                debug!(frame = %id, parent = ?parent, "Frame attached to unknown parent ignored");
            }
            AttachOutcome::RootExists => {
                debug!(frame = %id, "Second root frame attach ignored");
            }
        }
    }

    fn frame_navigated(&mut self, frame: &FramePayload, out: &mut Vec<FrameEvent>) {
        let newly_attached = frame.parent_id.is_some() && self.tree.key_of(&frame.id).is_none();

        let Some(navigated) = self.tree.navigate(frame) else {
            debug!(frame = %frame.id, "Navigation of frame with unknown parent ignored");
            return;
        };

        for removed in navigated.removed {
            self.destroy_frame_contexts(removed.key, out);
            out.push(FrameEvent::FrameDetached(removed));
        }

        let Some(info) = self.tree.info(navigated.key) else {
            return;
        };
        debug!(frame = %info.id, key = %info.key, url = %info.url, loader = %info.loader_id, "Frame navigated");

        if newly_attached {
            out.push(FrameEvent::FrameAttached(info.clone()));
        }
        out.push(FrameEvent::FrameNavigated(info));
    }

    fn navigated_within_document(&mut self, id: &FrameId, url: &str, out: &mut Vec<FrameEvent>) {
        let Some(info) = self
            .tree
            .navigate_within_document(id, url)
            .and_then(|key| self.tree.info(key))
        else {
            trace!(frame = %id, "Same-document navigation of unknown frame ignored");
            return;
        };

        debug!(frame = %id, url, "Frame navigated within document");
        out.push(FrameEvent::NavigatedWithinDocument(info.clone()));
        out.push(FrameEvent::FrameNavigated(info));
    }

    fn frame_detached(&mut self, params: &FrameDetached, out: &mut Vec<FrameEvent>) {
        if params.is_swap() {
            if let Some(info) = self
                .tree
                .key_of(&params.frame_id)
                .and_then(|key| self.tree.info(key))
            {
                debug!(frame = %params.frame_id, "Frame swapped out of process");
                out.push(FrameEvent::FrameSwapped(info));
            }
            return;
        }

        for removed in self.tree.remove(&params.frame_id) {
            debug!(frame = %removed.id, key = %removed.key, "Frame detached");
            self.destroy_frame_contexts(removed.key, out);
            out.push(FrameEvent::FrameDetached(removed));
        }
    }

    fn stopped_loading(&mut self, id: &FrameId, out: &mut Vec<FrameEvent>) {
        if let Some(frame) = self.tree.stopped_loading(id) {
            for name in ["DOMContentLoaded", "load"] {
                out.push(FrameEvent::LifecycleEvent {
                    frame,
                    name: name.to_string(),
                });
            }
        }
    }

    fn lifecycle_event(&mut self, params: &LifecycleEvent, out: &mut Vec<FrameEvent>) {
        match self
            .tree
            .record_lifecycle(&params.frame_id, params.loader_id.as_ref(), &params.name)
        {
            LifecycleOutcome::Recorded(frame) => {
                trace!(frame = %params.frame_id, name = %params.name, "Lifecycle event");
                out.push(FrameEvent::LifecycleEvent {
                    frame,
                    name: params.name.clone(),
                });
            }
            LifecycleOutcome::Stale(key) => {
                debug!(
                    frame = %params.frame_id,
                    %key,
                    name = %params.name,
                    loader = ?params.loader_id,
                    "Stale lifecycle event ignored"
                );
            }
            LifecycleOutcome::Unknown => {
                trace!(frame = %params.frame_id, name = %params.name, "Lifecycle event for unknown frame");
            }
        }
    }

    fn context_created(
        &mut self,
        client: &Arc<dyn CommandChannel>,
        context: &ExecutionContextDescription,
        out: &mut Vec<FrameEvent>,
    ) {
        let aux = context.aux_data.clone().unwrap_or_default();

        let frame = match &aux.frame_id {
            Some(frame_id) => match self.tree.key_of(frame_id) {
                Some(key) => Some(key),
                None => {
                    debug!(context = %context.id, frame = %frame_id, "Context for unknown frame ignored");
                    return;
                }
            },
            None => None,
        };

        let world = if aux.is_default {
            Some(World::Main)
        } else if aux.context_type.as_deref() == Some("isolated") {
            Some(World::Isolated(context.name.clone()))
        } else {
            None
        };

        for replaced in self.contexts.create(
            context.id,
            Arc::clone(client),
            frame,
            world.clone(),
            context.origin.clone(),
        ) {
            out.push(FrameEvent::ExecutionContextDestroyed {
                context_id: replaced,
                frame,
            });
        }

        trace!(context = %context.id, frame = ?frame, world = ?world, "Execution context created");
        out.push(FrameEvent::ExecutionContextCreated {
            context_id: context.id,
            frame,
            world,
        });
    }

    fn context_destroyed(
        &mut self,
        scope: Option<&SessionId>,
        id: ExecutionContextId,
        out: &mut Vec<FrameEvent>,
    ) {
        if let Some(entry) = self.contexts.destroy(scope, id) {
            out.push(destroyed_event(&entry));
        }
    }

    fn contexts_cleared(&mut self, scope: Option<&SessionId>, out: &mut Vec<FrameEvent>) {
        out.extend(self.contexts.clear(scope).iter().map(destroyed_event));
    }

    /// Drops everything an out-of-process frame's session contributed.
    fn frame_session_detached(
        &mut self,
        frame: &FrameId,
        session: &SessionId,
        out: &mut Vec<FrameEvent>,
    ) {
        self.contexts_cleared(Some(session), out);

        for removed in self.tree.remove(frame) {
            debug!(frame = %removed.id, key = %removed.key, "Out-of-process frame removed");
            self.destroy_frame_contexts(removed.key, out);
            out.push(FrameEvent::FrameDetached(removed));
        }
    }

    fn destroy_frame_contexts(&mut self, frame: FrameKey, out: &mut Vec<FrameEvent>) {
        out.extend(self.contexts.remove_frame(frame).iter().map(destroyed_event));
    }

    /// Replays a `Page.getFrameTree` result, parents first.
    fn replay(&mut self, node: &FrameTreePayload, out: &mut Vec<FrameEvent>) {
        if let Some(parent) = &node.frame.parent_id {
            self.frame_attached(&node.frame.id, Some(parent), out);
        }
        self.frame_navigated(&node.frame, out);

        for child in &node.child_frames {
            self.replay(child, out);
        }
    }
}

fn destroyed_event(entry: &ContextEntry) -> FrameEvent {
    FrameEvent::ExecutionContextDestroyed {
        context_id: entry.id,
        frame: entry.frame,
    }
}

fn parse_frame_tree(response: &Value) -> Result<FrameTreePayload> {
    let tree = response
        .get("frameTree")
        .cloned()
        .ok_or_else(|| Error::malformed("Page.getFrameTree response has no frameTree"))?;
    Ok(serde_json::from_value(tree)?)
}

fn isolated_world_script(name: &str) -> Value {
    json!({
        "source": format!("//# sourceURL={EVALUATION_SCRIPT_URL}"),
        "worldName": name,
    })
}

fn create_world_params(frame: &FrameId, name: &str) -> Value {
    json!({
        "frameId": frame,
        "grantUniveralAccess": true,
        "worldName": name,
    })
}

/// Registers world `name` for new documents of `session` and creates it in
/// `frame`.
async fn create_isolated_world(
    session: &dyn CommandChannel,
    frame: &FrameId,
    name: &str,
) -> Result<()> {
    session
        .send("Page.addScriptToEvaluateOnNewDocument", isolated_world_script(name))
        .await?;

    if let Err(e) = session
        .send("Page.createIsolatedWorld", create_world_params(frame, name))
        .await
    {
        debug!(frame = %frame, world = name, error = %e, "Isolated world not created");
    }
    Ok(())
}

fn auto_attach_params() -> Value {
    json!({
        "autoAttach": true,
        "waitForDebuggerOnStart": false,
        "flatten": true,
    })
}

/// Brings an adopted frame session up to the page session's state.
///
/// Holds the manager weakly: a manager dropped meanwhile ends the setup.
async fn initialize_frame_session(
    manager: Weak<FrameManagerInner>,
    frame: FrameId,
    session: Arc<dyn CommandChannel>,
) -> Result<()> {
    let (_, response) = tokio::try_join!(
        session.send("Page.enable", json!({})),
        session.send("Page.getFrameTree", json!({})),
    )?;
    let tree = parse_frame_tree(&response)?;

    let worlds: Vec<String> = {
        let Some(inner) = manager.upgrade() else {
            return Ok(());
        };
        let worlds = inner.isolated_worlds.lock().iter().cloned().collect();
        FrameManager { inner }.apply(|state, out| state.replay(&tree, out));
        worlds
    };

    session
        .send("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
        .await?;
    session.send("Runtime.enable", json!({})).await?;
    session.send("Target.setAutoAttach", auto_attach_params()).await?;

    for name in &worlds {
        create_isolated_world(session.as_ref(), &frame, name).await?;
    }

    debug!(frame = %frame, "Out-of-process frame initialized");
    Ok(())
}

// ============================================================================
// FrameManager
// ============================================================================

/// Child session of an out-of-process frame.
struct FrameSession {
    frame: FrameId,
    client: Arc<dyn CommandChannel>,
    /// Handler on the child's event bus; unregistered on drop.
    _listener: Listener,
}

struct FrameManagerInner {
    client: Arc<dyn CommandChannel>,
    state: Mutex<FrameState>,
    events: EventBus<FrameEvent>,
    timeouts: Mutex<TimeoutSettings>,
    isolated_worlds: Mutex<FxHashSet<String>>,
    frame_sessions: Mutex<FxHashMap<SessionId, FrameSession>>,
    /// Handler on the client's event bus; unregistered on drop.
    listener: Mutex<Option<Listener>>,
}

/// Live frame tree of one page target.
///
/// Cheap to clone. Dropping the last clone unregisters from the client.
#[derive(Clone)]
pub struct FrameManager {
    inner: Arc<FrameManagerInner>,
}

impl fmt::Debug for FrameManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FrameManager")
            .field("frames", &state.tree.len())
            .field("contexts", &state.contexts.len())
            .field("frame_sessions", &self.inner.frame_sessions.lock().len())
            .field("session", &self.inner.client.session_id())
            .finish()
    }
}

impl FrameManager {
    /// Creates a manager fed by `client`'s events.
    ///
    /// Events are applied from the moment of creation. Call
    /// [`initialize`](Self::initialize) to enable the domains and load the
    /// current tree.
    #[must_use]
    pub fn new(client: Arc<dyn CommandChannel>) -> Self {
        let inner = Arc::new(FrameManagerInner {
            client,
            state: Mutex::new(FrameState::default()),
            events: EventBus::new(),
            timeouts: Mutex::new(TimeoutSettings::default()),
            isolated_worlds: Mutex::new(FxHashSet::default()),
            frame_sessions: Mutex::new(FxHashMap::default()),
            listener: Mutex::new(None),
        });

        let weak: Weak<FrameManagerInner> = Arc::downgrade(&inner);
        let listener = inner.client.events().listen(move |event| {
            if let Some(inner) = weak.upgrade() {
                let client = Arc::clone(&inner.client);
                FrameManager { inner }.handle_event(&client, &event.parse());
            }
        });
        *inner.listener.lock() = Some(listener);

        Self { inner }
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Enables the `Page` and `Runtime` domains and loads the frame tree.
    ///
    /// Also turns on flattened auto-attach, so out-of-process iframes are
    /// announced on the client and adopted.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's error, or [`Error::Malformed`]
    /// if the frame tree response has no `frameTree`.
    pub async fn initialize(&self) -> Result<()> {
        let client = &self.inner.client;

        let (_, response) = tokio::try_join!(
            client.send("Page.enable", json!({})),
            client.send("Page.getFrameTree", json!({})),
        )?;

        let tree = parse_frame_tree(&response)?;
        self.apply(|state, out| state.replay(&tree, out));

        client
            .send("Page.setLifecycleEventsEnabled", json!({ "enabled": true }))
            .await?;
        client.send("Runtime.enable", json!({})).await?;
        client.send("Target.setAutoAttach", auto_attach_params()).await?;

        self.ensure_isolated_world(UTILITY_WORLD_NAME).await?;

        debug!(frames = self.inner.state.lock().tree.len(), "Frame manager initialized");
        Ok(())
    }

    /// Creates isolated world `name` in every frame, and in every future
    /// document.
    ///
    /// No-op once the world was registered. Frames that vanish while the
    /// world is being created are skipped. Adopted out-of-process frames
    /// get the world through their own session.
    ///
    /// # Errors
    ///
    /// Returns an error if the new-document script cannot be registered;
    /// a later call retries.
    pub async fn ensure_isolated_world(&self, name: &str) -> Result<()> {
        if self.inner.isolated_worlds.lock().contains(name) {
            return Ok(());
        }

        let client = &self.inner.client;
        client
            .send("Page.addScriptToEvaluateOnNewDocument", isolated_world_script(name))
            .await?;
        self.inner.isolated_worlds.lock().insert(name.to_string());

        let frame_ids: Vec<FrameId> = self.frames().into_iter().map(|f| f.id).collect();
        let results = join_all(
            frame_ids
                .iter()
                .map(|id| client.send("Page.createIsolatedWorld", create_world_params(id, name))),
        )
        .await;

        for (id, result) in frame_ids.iter().zip(results) {
            if let Err(e) = result {
                debug!(frame = %id, world = name, error = %e, "Isolated world not created");
            }
        }

        let sessions: Vec<(FrameId, Arc<dyn CommandChannel>)> = self
            .inner
            .frame_sessions
            .lock()
            .values()
            .map(|s| (s.frame.clone(), Arc::clone(&s.client)))
            .collect();
        for (frame, session) in sessions {
            if let Err(e) = create_isolated_world(session.as_ref(), &frame, name).await {
                debug!(frame = %frame, world = name, error = %e, "Isolated world not registered");
            }
        }

        Ok(())
    }

    // ========================================================================
    // Event Application
    // ========================================================================

    /// Applies one event received on `client`, the page channel or an
    /// adopted frame session.
    fn handle_event(&self, client: &Arc<dyn CommandChannel>, event: &ProtocolEvent) {
        match event {
            ProtocolEvent::FrameAttached(p) => {
                self.apply(|s, out| s.frame_attached(&p.frame_id, p.parent_frame_id.as_ref(), out));
            }
            ProtocolEvent::FrameNavigated(p) => {
                self.apply(|s, out| s.frame_navigated(&p.frame, out));
            }
            ProtocolEvent::NavigatedWithinDocument(p) => {
                self.apply(|s, out| s.navigated_within_document(&p.frame_id, &p.url, out));
            }
            ProtocolEvent::FrameDetached(p) => self.apply(|s, out| s.frame_detached(p, out)),
            ProtocolEvent::FrameStoppedLoading(p) => {
                self.apply(|s, out| s.stopped_loading(&p.frame_id, out));
            }
            ProtocolEvent::LifecycleEvent(p) => self.apply(|s, out| s.lifecycle_event(p, out)),
            ProtocolEvent::ExecutionContextCreated(p) => {
                self.apply(|s, out| s.context_created(client, &p.context, out));
            }
            ProtocolEvent::ExecutionContextDestroyed(p) => {
                let scope = client.session_id();
                self.apply(|s, out| s.context_destroyed(scope, p.execution_context_id, out));
            }
            ProtocolEvent::ExecutionContextsCleared => {
                self.apply(|s, out| s.contexts_cleared(client.session_id(), out));
            }
            ProtocolEvent::TargetAttached(p) => self.target_attached(client, p),
            ProtocolEvent::TargetDetached(p) => self.target_detached(p),
            ProtocolEvent::Unknown { .. } => {}
        }
    }

    // ========================================================================
    // Out-of-Process Frames
    // ========================================================================

    /// Adopts the session of an out-of-process frame.
    ///
    /// The session's `Page.*` and `Runtime.*` events feed the same tree
    /// from now on. Its frame tree is replayed, lifecycle events and nested
    /// auto-attach are enabled, and registered isolated worlds are created.
    /// Adopting an already adopted session is a no-op.
    ///
    /// Sessions announced on the client are adopted automatically; this is
    /// the entry point for sessions attached by other means.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `session` is not scoped to a session
    /// - the first failing command's error
    pub async fn adopt_frame_session(
        &self,
        frame: FrameId,
        session: Arc<dyn CommandChannel>,
    ) -> Result<()> {
        if !self.register_frame_session(frame.clone(), Arc::clone(&session))? {
            return Ok(());
        }
        initialize_frame_session(Arc::downgrade(&self.inner), frame, session).await
    }

    /// Returns the number of adopted out-of-process frame sessions.
    #[inline]
    #[must_use]
    pub fn frame_session_count(&self) -> usize {
        self.inner.frame_sessions.lock().len()
    }

    /// Starts listening on a frame session. Returns `false` if it was
    /// already adopted.
    fn register_frame_session(
        &self,
        frame: FrameId,
        client: Arc<dyn CommandChannel>,
    ) -> Result<bool> {
        let Some(session_id) = client.session_id().cloned() else {
            return Err(Error::invalid_argument(
                "frame session channel has no session ID",
            ));
        };

        let mut sessions = self.inner.frame_sessions.lock();
        if sessions.contains_key(&session_id) {
            return Ok(false);
        }

        let weak: Weak<FrameManagerInner> = Arc::downgrade(&self.inner);
        let scope = session_id.clone();
        let listener = client.events().listen(move |event| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let client = inner
                .frame_sessions
                .lock()
                .get(&scope)
                .map(|s| Arc::clone(&s.client));
            if let Some(client) = client {
                FrameManager { inner }.handle_event(&client, &event.parse());
            }
        });

        debug!(frame = %frame, session = %session_id, "Adopting out-of-process frame session");
        sessions.insert(
            session_id,
            FrameSession {
                frame,
                client,
                _listener: listener,
            },
        );
        Ok(true)
    }

    /// Adopts an `iframe` target announced on `parent`.
    fn target_attached(&self, parent: &Arc<dyn CommandChannel>, attached: &TargetAttached) {
        if attached.target_info.target_type != IFRAME_TARGET_TYPE {
            return;
        }

        let Some(session) = parent.attached_session(&attached.session_id) else {
            debug!(session = %attached.session_id, "Announced iframe session not found");
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(session = %attached.session_id, "No runtime to initialize iframe session on");
            return;
        };

        let frame = FrameId::new(attached.target_info.target_id.as_str());
        match self.register_frame_session(frame.clone(), Arc::clone(&session)) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                debug!(session = %attached.session_id, error = %e, "Iframe session not adopted");
                return;
            }
        }

        let weak = Arc::downgrade(&self.inner);
        runtime.spawn(async move {
            if let Err(e) = initialize_frame_session(weak, frame.clone(), session).await {
                if e.is_connection_error() {
                    debug!(frame = %frame, error = %e, "Iframe session closed during initialization");
                } else {
                    warn!(frame = %frame, error = %e, "Iframe session initialization failed");
                }
            }
        });
    }

    /// Removes an adopted frame's subtree once its session detaches.
    fn target_detached(&self, detached: &TargetDetached) {
        let Some(session) = self.inner.frame_sessions.lock().remove(&detached.session_id) else {
            return;
        };

        debug!(frame = %session.frame, session = %detached.session_id, "Frame session detached");
        self.apply(|state, out| {
            state.frame_session_detached(&session.frame, &detached.session_id, out);
        });
    }

    /// Mutates state under the lock, then publishes the resulting events.
    fn apply<F>(&self, mutate: F)
    where
        F: FnOnce(&mut FrameState, &mut Vec<FrameEvent>),
    {
        let mut out = Vec::new();
        {
            let mut state = self.inner.state.lock();
            mutate(&mut state, &mut out);
        }

        for event in out {
            self.inner.events.publish(event);
        }
    }

    /// Records a synthetic lifecycle milestone for the frame's current
    /// document.
    ///
    /// Used by request trackers to report `networkIdle` and
    /// `networkAlmostIdle`. Returns `false` if the frame is not attached.
    pub fn record_lifecycle_event(&self, frame: FrameKey, name: &str) -> bool {
        let mut recorded = false;
        self.apply(|state, out| {
            recorded = state.tree.record_lifecycle_by_key(frame, name);
            if recorded {
                out.push(FrameEvent::LifecycleEvent {
                    frame,
                    name: name.to_string(),
                });
            }
        });
        recorded
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Returns the main frame.
    #[must_use]
    pub fn main_frame(&self) -> Option<FrameInfo> {
        let state = self.inner.state.lock();
        state.tree.main().and_then(|key| state.tree.info(key))
    }

    /// Looks up a frame by protocol ID.
    #[must_use]
    pub fn frame(&self, id: &FrameId) -> Option<FrameInfo> {
        let state = self.inner.state.lock();
        state.tree.key_of(id).and_then(|key| state.tree.info(key))
    }

    /// Looks up a frame by key.
    #[must_use]
    pub fn frame_by_key(&self, key: FrameKey) -> Option<FrameInfo> {
        self.inner.state.lock().tree.info(key)
    }

    /// Returns every attached frame, parents before children.
    #[must_use]
    pub fn frames(&self) -> Vec<FrameInfo> {
        let state = self.inner.state.lock();
        state
            .tree
            .keys()
            .into_iter()
            .filter_map(|key| state.tree.info(key))
            .collect()
    }

    /// Returns the direct children of a frame.
    #[must_use]
    pub fn child_frames(&self, key: FrameKey) -> Vec<FrameInfo> {
        let state = self.inner.state.lock();
        state
            .tree
            .get(key)
            .map(|node| {
                node.children
                    .iter()
                    .filter_map(|child| state.tree.info(*child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the parent of a frame.
    #[must_use]
    pub fn parent_frame(&self, key: FrameKey) -> Option<FrameInfo> {
        let state = self.inner.state.lock();
        let parent = state.tree.get(key)?.parent?;
        state.tree.info(parent)
    }

    /// Returns the frame's live context in `world`.
    #[must_use]
    pub fn execution_context(&self, frame: FrameKey, world: &World) -> Option<ExecutionContext> {
        let state = self.inner.state.lock();
        state
            .contexts
            .for_frame(frame, world)
            .map(ContextEntry::handle)
    }

    /// Returns a context announced on the page channel by ID.
    ///
    /// Context IDs of out-of-process frames are scoped to their own
    /// session; reach those through [`execution_context`](Self::execution_context).
    #[must_use]
    pub fn context_by_id(&self, id: ExecutionContextId) -> Option<ExecutionContext> {
        let state = self.inner.state.lock();
        state
            .contexts
            .get(self.inner.client.session_id(), id)
            .map(ContextEntry::handle)
    }

    /// Waits until the frame has a live context in `world`.
    ///
    /// A zero `timeout` waits indefinitely.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no context appears in time
    /// - [`Error::NavigationTerminated`] if the frame detaches or the
    ///   manager goes away
    pub async fn wait_for_execution_context(
        &self,
        frame: FrameKey,
        world: World,
        timeout: Duration,
    ) -> Result<ExecutionContext> {
        let mut events = self.subscribe();

        let wait = async {
            loop {
                {
                    let state = self.inner.state.lock();
                    if state.tree.get(frame).is_none() {
                        return Err(Error::navigation_terminated("Frame was detached"));
                    }
                    if let Some(entry) = state.contexts.for_frame(frame, &world) {
                        return Ok(entry.handle());
                    }
                }

                if events.recv().await.is_none() {
                    return Err(Error::navigation_terminated("Frame manager was dropped"));
                }
            }
        };

        if timeout.is_zero() {
            return wait.await;
        }

        tokio::time::timeout(timeout, wait).await.map_err(|_| {
            Error::timeout(
                format!("waiting for {world} execution context of frame {frame}"),
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )
        })?
    }

    /// Current loader of a frame.
    pub(crate) fn loader_of(&self, frame: FrameKey) -> Option<LoaderId> {
        self.inner
            .state
            .lock()
            .tree
            .get(frame)
            .map(|node| node.loader_id.clone())
    }

    /// Runs `f` against the frame tree under the state lock.
    pub(crate) fn with_tree<R>(&self, f: impl FnOnce(&FrameTree) -> R) -> R {
        f(&self.inner.state.lock().tree)
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Navigates `frame` to `url` and waits for the requested milestones.
    ///
    /// The watcher is created before `Page.navigate` is sent, so events
    /// racing the command response are not lost.
    ///
    /// # Errors
    ///
    /// - [`Error::NavigationFailed`] if the browser reports `errorText`
    /// - [`Error::NavigationTimeout`] if the milestones are not reached in time
    /// - [`Error::NavigationTerminated`] on frame detach or disconnect
    /// - [`Error::Protocol`] if `Page.navigate` itself fails
    pub async fn navigate_frame(
        &self,
        frame: &FrameInfo,
        url: &str,
        options: NavigateOptions,
    ) -> Result<NavigationOutcome> {
        let timeout = options.timeout.unwrap_or_else(|| self.navigation_timeout());
        let mut watcher = LifecycleWatcher::new(self, frame.key, &options.wait_until, timeout)?;

        let mut params = json!({ "url": url, "frameId": frame.id });
        if let Some(referer) = &options.referer {
            params["referrer"] = json!(referer);
        }

        debug!(frame = %frame.id, url, "Navigating frame");
        let response = watcher
            .race(self.inner.client.send("Page.navigate", params))
            .await?;

        if let Some(error_text) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(Error::navigation_failed(url, error_text));
        }

        let new_document = response
            .get("loaderId")
            .and_then(Value::as_str)
            .is_some_and(|loader| !loader.is_empty());

        let expectation = if new_document {
            Expectation::NewDocument
        } else {
            Expectation::SameDocument
        };

        watcher.wait_for(expectation).await
    }

    /// Waits for the next navigation of `frame`, of either kind.
    ///
    /// # Errors
    ///
    /// Same as [`navigate_frame`](Self::navigate_frame), minus command
    /// failures.
    pub async fn wait_for_navigation(
        &self,
        frame: &FrameInfo,
        options: NavigateOptions,
    ) -> Result<NavigationOutcome> {
        let timeout = options.timeout.unwrap_or_else(|| self.navigation_timeout());
        LifecycleWatcher::new(self, frame.key, &options.wait_until, timeout)?
            .wait_for(Expectation::Any)
            .await
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the default navigation timeout.
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        self.inner.timeouts.lock().navigation
    }

    /// Sets the default navigation timeout. Zero disables it.
    pub fn set_navigation_timeout(&self, timeout: Duration) {
        self.inner.timeouts.lock().navigation = timeout;
    }

    /// Returns the channel commands are sent on.
    #[inline]
    #[must_use]
    pub fn client(&self) -> &Arc<dyn CommandChannel> {
        &self.inner.client
    }

    /// Subscribes to frame events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<FrameEvent> {
        self.inner.events.subscribe()
    }

    /// Registers a handler run on the dispatch path for each frame event.
    #[must_use]
    pub fn listen<F>(&self, handler: F) -> Listener
    where
        F: Fn(&FrameEvent) + Send + Sync + 'static,
    {
        self.inner.events.listen(handler)
    }

    /// Returns the number of live frame event subscribers.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.events.listener_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
