//! Command channel abstraction.
//!
//! [`FrameManager`](crate::FrameManager) and
//! [`ExecutionContext`](crate::ExecutionContext) only need "send a command,
//! observe events, notice disconnect". Both [`Connection`] and [`Session`]
//! provide that, so the frame layer works against this trait.
//!
//! Child targets auto-attached through an endpoint (out-of-process iframes)
//! are resolved with [`CommandChannel::attached_session`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::error::Result;
use crate::events::EventBus;
use crate::identifiers::SessionId;
use crate::protocol::Event;

use super::{Connection, Session};

// ============================================================================
// CommandChannel
// ============================================================================

/// A protocol endpoint commands can be sent through.
#[async_trait]
pub trait CommandChannel: Send + Sync + 'static {
    /// Sends a command and waits for its result.
    async fn send(&self, method: &str, params: Value) -> Result<Value>;

    /// Events delivered to this endpoint.
    fn events(&self) -> &EventBus<Event>;

    /// Flips to `true` once the endpoint is torn down.
    fn closed(&self) -> watch::Receiver<bool>;

    /// Session the endpoint is scoped to, `None` for the browser level.
    fn session_id(&self) -> Option<&SessionId>;

    /// Resolves a live session announced by `Target.attachedToTarget` on
    /// this endpoint.
    ///
    /// Endpoints without child sessions return `None`.
    fn attached_session(&self, session_id: &SessionId) -> Option<Arc<dyn CommandChannel>> {
        let _ = session_id;
        None
    }
}

#[async_trait]
impl CommandChannel for Connection {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        Connection::send(self, method, params).await
    }

    fn events(&self) -> &EventBus<Event> {
        Connection::events(self)
    }

    fn closed(&self) -> watch::Receiver<bool> {
        Connection::closed(self)
    }

    fn session_id(&self) -> Option<&SessionId> {
        None
    }

    fn attached_session(&self, session_id: &SessionId) -> Option<Arc<dyn CommandChannel>> {
        let session: Arc<dyn CommandChannel> = Arc::new(self.session(session_id)?);
        Some(session)
    }
}

#[async_trait]
impl CommandChannel for Session {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        Session::send(self, method, params).await
    }

    fn events(&self) -> &EventBus<Event> {
        Session::events(self)
    }

    fn closed(&self) -> watch::Receiver<bool> {
        Session::closed(self)
    }

    fn session_id(&self) -> Option<&SessionId> {
        Some(self.id())
    }

    fn attached_session(&self, session_id: &SessionId) -> Option<Arc<dyn CommandChannel>> {
        let session: Arc<dyn CommandChannel> = Arc::new(self.connection()?.session(session_id)?);
        Some(session)
    }
}
