//! Per-target sessions.
//!
//! A [`Session`] is a logical channel to one attached target, multiplexed
//! over its parent [`Connection`] by `sessionId`. Sessions are created and
//! destroyed by the connection when it sees `Target.attachedToTarget` and
//! `Target.detachedFromTarget`; user code only obtains handles.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::{EventBus, Listener, Subscription};
use crate::identifiers::{SessionId, TargetId};
use crate::protocol::{Event, Incoming, TargetInfo};

use super::Connection;
use super::connection::{ConnectionInner, await_response};
use super::pending::PendingTable;

// ============================================================================
// SessionInner
// ============================================================================

struct SessionInner {
    id: SessionId,
    target: TargetInfo,
    connection: Weak<ConnectionInner>,
    pending: Mutex<PendingTable>,
    events: EventBus<Event>,
    closed_tx: watch::Sender<bool>,
}

// ============================================================================
// Session
// ============================================================================

/// Logical channel to one attached target.
///
/// Cheap to clone. Commands carry the session's `sessionId`; responses and
/// events tagged with it are delivered here.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("target_type", &self.inner.target.target_type)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        target: TargetInfo,
        connection: Weak<ConnectionInner>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(SessionInner {
                id,
                target,
                connection,
                pending: Mutex::new(PendingTable::default()),
                events: EventBus::new(),
                closed_tx,
            }),
        }
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Sends a command to the target and waits for its result.
    ///
    /// # Errors
    ///
    /// - [`Error::TargetClosed`] if the session is (or becomes) detached
    /// - [`Error::Protocol`] if the browser answers with an error
    /// - [`Error::CommandTimeout`] if no response arrives in time
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let Some(connection) = self.inner.connection.upgrade() else {
            return Err(Error::target_closed(method));
        };
        let command_timeout = connection.command_timeout();
        drop(connection);

        self.send_inner(method, params, command_timeout).await
    }

    /// Sends a command with a custom timeout.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_with_timeout(
        &self,
        method: &str,
        params: Value,
        command_timeout: Duration,
    ) -> Result<Value> {
        self.send_inner(method, params, Some(command_timeout)).await
    }

    async fn send_inner(
        &self,
        method: &str,
        params: Value,
        command_timeout: Option<Duration>,
    ) -> Result<Value> {
        let (id, rx) = {
            let Some(connection) = self.inner.connection.upgrade() else {
                return Err(Error::target_closed(method));
            };
            connection.enqueue(
                &self.inner.pending,
                Some(&self.inner.id),
                method,
                params,
                |method| Error::target_closed(method),
            )?
        };

        await_response(&self.inner.pending, id, method, rx, command_timeout).await
    }

    /// Detaches from the target.
    ///
    /// Sends `Target.detachFromTarget` through the parent connection. The
    /// session closes when the browser confirms with
    /// `Target.detachedFromTarget`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TargetClosed`] if the session is already closed.
    pub async fn detach(&self) -> Result<()> {
        const METHOD: &str = "Target.detachFromTarget";

        if self.is_closed() {
            return Err(Error::target_closed(METHOD));
        }

        let connection = self
            .connection()
            .ok_or_else(|| Error::target_closed(METHOD))?;

        connection
            .send(METHOD, json!({ "sessionId": self.inner.id }))
            .await?;

        Ok(())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Delivers a message tagged with this session's ID.
    pub(crate) fn dispatch(&self, incoming: Incoming) {
        match incoming {
            Incoming::Response(response) => {
                let id = response.id;
                if !self.inner.pending.lock().settle(response) {
                    debug!(session = %self.inner.id, %id, "Response for unknown command ignored");
                }
            }
            Incoming::Event(event) => self.inner.events.publish(event),
        }
    }

    /// Rejects pending commands and marks the session closed.
    pub(crate) fn on_closed(&self) {
        let rejected = self.inner.pending.lock().reject_all();
        self.inner.closed_tx.send_replace(true);

        debug!(session = %self.inner.id, rejected, "Session closed");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Returns the attached target's ID.
    #[inline]
    #[must_use]
    pub fn target_id(&self) -> &TargetId {
        &self.inner.target.target_id
    }

    /// Returns the target type (`page`, `iframe`, `worker`, ...).
    #[inline]
    #[must_use]
    pub fn target_type(&self) -> &str {
        &self.inner.target.target_type
    }

    /// Returns the target description announced at attach time.
    #[inline]
    #[must_use]
    pub fn target_info(&self) -> &TargetInfo {
        &self.inner.target
    }

    /// Returns the parent connection, if it still exists.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.inner.connection.upgrade().map(Connection::from_inner)
    }

    /// Returns `true` once the session was detached or its connection
    /// torn down.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    /// Returns a receiver that flips to `true` when the session closes.
    #[must_use]
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.inner.closed_tx.subscribe()
    }

    /// Returns the number of pending commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Events tagged with this session's ID.
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus<Event> {
        &self.inner.events
    }

    /// Subscribes to this session's events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<Event> {
        self.inner.events.subscribe()
    }

    /// Registers a handler run on the event loop for each session event.
    #[must_use]
    pub fn listen<F>(&self, handler: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.listen(handler)
    }
}

// ============================================================================
// Tests
// ============================================================================
