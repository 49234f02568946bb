//! Root connection and event loop.
//!
//! This module owns the transport to the browser, including command/response
//! correlation, session demultiplexing and teardown.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming messages from the browser (responses, events)
//! - Outgoing commands queued by [`Connection`] and [`Session`] handles
//! - Session creation and destruction from `Target.*` control events
//! - Teardown once the transport closes
//!
//! Inbound messages are processed one at a time, in arrival order, so
//! handlers registered with [`Connection::listen`] observe a consistent
//! sequence of state changes.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json, to_string};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::config::{ConnectionBuilder, ConnectionOptions};
use crate::error::{Error, Result};
use crate::events::{EventBus, Listener, Subscription};
use crate::identifiers::{CommandId, SessionId, TargetId};
use crate::protocol::{Command, Event, Incoming, ProtocolEvent};

use super::pending::PendingTable;
use super::{Session, Transport, TransportSink, TransportSource};

// ============================================================================
// Constants
// ============================================================================

/// Tracing target of wire-level message logs.
pub const PROTOCOL_TARGET: &str = "cdp_webdriver::protocol";

// ============================================================================
// Types
// ============================================================================

/// Error produced when a pending table is already closed.
pub(crate) type ClosedError = fn(&str) -> Error;

/// Messages for the event loop's outbound half.
#[derive(Debug)]
enum Outbound {
    /// Write a serialized command.
    Message { id: CommandId, text: String },
    /// Close the transport.
    Close,
}

/// ID allocation and outbound queue, locked together so wire order
/// matches ID order.
#[derive(Debug)]
struct Writer {
    next_id: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

// ============================================================================
// ConnectionInner
// ============================================================================

/// State shared by [`Connection`] handles, sessions and the event loop.
pub(crate) struct ConnectionInner {
    writer: Mutex<Writer>,
    /// Browser-level commands.
    pending: Mutex<PendingTable>,
    sessions: Mutex<FxHashMap<SessionId, Session>>,
    events: EventBus<Event>,
    closed_tx: watch::Sender<bool>,
    options: ConnectionOptions,
}

impl ConnectionInner {
    /// Returns the configured command timeout.
    #[inline]
    pub(crate) fn command_timeout(&self) -> Option<Duration> {
        self.options.command_timeout
    }

    /// Registers a command in `table` and queues it for writing.
    ///
    /// The entry exists before the message can reach the wire, so the
    /// response always finds it.
    pub(crate) fn enqueue(
        &self,
        table: &Mutex<PendingTable>,
        session_id: Option<&SessionId>,
        method: &str,
        params: Value,
        closed_error: ClosedError,
    ) -> Result<(CommandId, oneshot::Receiver<Result<Value>>)> {
        let mut table = table.lock();

        if table.is_closed() {
            return Err(closed_error(method));
        }

        let max = self.options.max_pending_commands;
        if table.len() >= max {
            warn!(pending = table.len(), max, method, "Too many pending commands");
            return Err(Error::TooManyPendingCommands {
                pending: table.len(),
                max,
            });
        }

        let mut writer = self.writer.lock();
        writer.next_id += 1;
        let id = CommandId::new(writer.next_id);

        let command = Command::new(id, method, params, session_id.cloned());
        let text = to_string(&command)?;

        let (tx, rx) = oneshot::channel();
        table.insert(id, method, tx);

        if writer.tx.send(Outbound::Message { id, text }).is_err() {
            table.remove(id);
            return Err(closed_error(method));
        }

        trace!(%id, method, session = ?session_id, "Command queued");
        Ok((id, rx))
    }

    /// Routes one inbound message.
    fn dispatch(self: &Arc<Self>, text: &str) {
        let incoming = match Incoming::parse(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable message");
                return;
            }
        };

        // Control events create/destroy sessions before ordinary routing.
        if let Incoming::Event(event) = &incoming {
            self.handle_target_event(event);
        }

        if let Some(session_id) = incoming.session_id().cloned() {
            let session = self.sessions.lock().get(&session_id).cloned();
            match session {
                Some(session) => session.dispatch(incoming),
                None => debug!(session = %session_id, "Message for unknown session dropped"),
            }
            return;
        }

        match incoming {
            Incoming::Response(response) => {
                let id = response.id;
                if !self.pending.lock().settle(response) {
                    debug!(%id, "Response for unknown command ignored");
                }
            }
            Incoming::Event(event) => self.events.publish(event),
        }
    }

    /// Applies `Target.attachedToTarget` / `Target.detachedFromTarget`.
    fn handle_target_event(self: &Arc<Self>, event: &Event) {
        match event.parse() {
            ProtocolEvent::TargetAttached(attached) => {
                let session_id = attached.session_id.clone();
                let mut sessions = self.sessions.lock();

                if self.pending.lock().is_closed() {
                    debug!(session = %session_id, "Attach after teardown ignored");
                    return;
                }

                if sessions.contains_key(&session_id) {
                    debug!(session = %session_id, "Duplicate attach ignored");
                    return;
                }

                debug!(
                    session = %session_id,
                    target = %attached.target_info.target_id,
                    target_type = %attached.target_info.target_type,
                    "Session attached"
                );

                let session = Session::new(
                    session_id.clone(),
                    attached.target_info,
                    Arc::downgrade(self),
                );
                sessions.insert(session_id, session);
            }

            ProtocolEvent::TargetDetached(detached) => {
                let session = self.sessions.lock().remove(&detached.session_id);
                match session {
                    Some(session) => session.on_closed(),
                    None => debug!(session = %detached.session_id, "Detach for unknown session"),
                }
            }

            _ => {}
        }
    }

    /// Rejects all pending commands and closes every session.
    ///
    /// Idempotent.
    fn teardown(&self) {
        let rejected = {
            let mut pending = self.pending.lock();
            if pending.is_closed() {
                return;
            }
            pending.reject_all()
        };

        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.on_closed();
        }

        self.closed_tx.send_replace(true);

        info!(rejected, sessions = sessions.len(), "Connection closed");
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        // Last handle gone: sessions must still observe the close.
        self.teardown();
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Connection to a browser's DevTools endpoint.
///
/// Handles command/response correlation, event routing and the
/// [`Session`]s multiplexed over the transport. The connection spawns an
/// internal event loop task.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone. Sessions reference
/// the connection weakly: keep a `Connection` handle alive for as long as
/// its sessions are in use.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("pending", &self.pending_count())
            .field("sessions", &self.session_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl Connection {
    /// Creates a builder for configuring a connection.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    /// Connects to a DevTools WebSocket endpoint with default options.
    ///
    /// # Errors
    ///
    /// See [`ConnectionBuilder::connect`].
    pub async fn connect(ws_url: &str) -> Result<Self> {
        Self::builder().connect(ws_url).await
    }

    /// Starts a connection over `transport`.
    ///
    /// Spawns the event loop task internally.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the options are invalid or no tokio
    /// runtime is running.
    pub fn from_transport<T: Transport>(transport: T, options: ConnectionOptions) -> Result<Self> {
        options.validate()?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::config("A connection must be created inside a tokio runtime"))?;

        let (sink, source) = transport.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);
        let slow_mo = options.slow_mo;

        let inner = Arc::new(ConnectionInner {
            writer: Mutex::new(Writer {
                next_id: 0,
                tx: outbound_tx,
            }),
            pending: Mutex::new(PendingTable::default()),
            sessions: Mutex::new(FxHashMap::default()),
            events: EventBus::new(),
            closed_tx,
            options,
        });

        runtime.spawn(run_event_loop(
            Arc::downgrade(&inner),
            sink,
            source,
            outbound_rx,
            slow_mo,
        ));

        debug!("Connection event loop started");

        Ok(Self { inner })
    }

    #[inline]
    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self {
        Self { inner }
    }
}

// ============================================================================
// Commands
// ============================================================================

impl Connection {
    /// Sends a browser-level command and waits for its result.
    ///
    /// Uses the configured command timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is already closed
    /// - [`Error::TargetClosed`] if it closes while the command is pending
    /// - [`Error::Protocol`] if the browser answers with an error
    /// - [`Error::CommandTimeout`] if no response arrives in time
    /// - [`Error::TooManyPendingCommands`] if the pending table is full
    pub async fn send(&self, method: &str, params: Value) -> Result<Value> {
        let command_timeout = self.inner.command_timeout();
        self.send_inner(method, params, command_timeout).await
    }

    /// Sends a browser-level command with a custom timeout.
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
        let (id, rx) =
            self.inner
                .enqueue(&self.inner.pending, None, method, params, |_| Error::ConnectionClosed)?;

        await_response(&self.inner.pending, id, method, rx, command_timeout).await
    }

    /// Attaches to a target and returns its session.
    ///
    /// Sends `Target.attachToTarget` in flattened mode. The browser emits
    /// `Target.attachedToTarget` before answering, so the session already
    /// exists when the response arrives.
    ///
    /// # Errors
    ///
    /// - [`Error::Malformed`] if the response lacks a `sessionId`
    /// - [`Error::SessionNotFound`] if no session was announced
    /// - any error of [`send`](Self::send)
    pub async fn create_session(&self, target_id: &TargetId) -> Result<Session> {
        let result = self
            .send(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;

        let session_id = result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(SessionId::new)
            .ok_or_else(|| Error::malformed("Target.attachToTarget response without sessionId"))?;

        self.session(&session_id)
            .ok_or_else(|| Error::session_not_found(session_id))
    }

    /// Closes the connection.
    ///
    /// Pending commands fail with [`Error::TargetClosed`], every session is
    /// closed and the transport is shut down.
    pub fn close(&self) {
        self.inner.teardown();
        let _ = self.inner.writer.lock().tx.send(Outbound::Close);
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Connection {
    /// Returns the session with the given ID.
    #[must_use]
    pub fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.inner.sessions.lock().get(session_id).cloned()
    }

    /// Returns all live sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Session> {
        self.inner.sessions.lock().values().cloned().collect()
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    /// Returns the number of pending browser-level commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Returns `true` once the connection was torn down.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    /// Returns a receiver that flips to `true` on teardown.
    #[must_use]
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.inner.closed_tx.subscribe()
    }

    /// Browser-level events (those without a `sessionId`).
    #[inline]
    #[must_use]
    pub fn events(&self) -> &EventBus<Event> {
        &self.inner.events
    }

    /// Subscribes to browser-level events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<Event> {
        self.inner.events.subscribe()
    }

    /// Registers a handler run on the event loop for each browser-level
    /// event.
    #[must_use]
    pub fn listen<F>(&self, handler: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.listen(handler)
    }

    /// Returns the options this connection was created with.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }
}

// ============================================================================
// Response Waiting
// ============================================================================

/// Waits for a queued command's completion.
///
/// On timeout the entry is removed, so a late response is ignored.
pub(crate) async fn await_response(
    table: &Mutex<PendingTable>,
    id: CommandId,
    method: &str,
    rx: oneshot::Receiver<Result<Value>>,
    command_timeout: Option<Duration>,
) -> Result<Value> {
    let outcome = match command_timeout {
        Some(limit) => match timeout(limit, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                table.lock().remove(id);
                debug!(%id, method, "Command timed out");
                return Err(Error::command_timeout(method, limit.as_millis() as u64));
            }
        },
        None => rx.await,
    };

    outcome.unwrap_or_else(|_| Err(Error::target_closed(method)))
}

// ============================================================================
// Event Loop
// ============================================================================

/// Event loop that owns the transport.
///
/// Holds the shared state weakly: once every handle is dropped the
/// outbound queue closes and the loop shuts the transport down.
async fn run_event_loop<K, S>(
    inner: Weak<ConnectionInner>,
    mut sink: K,
    mut source: S,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    slow_mo: Option<Duration>,
) where
    K: TransportSink,
    S: TransportSource,
{
    loop {
        tokio::select! {
            // Incoming messages from the browser
            message = source.recv() => {
                match message {
                    Some(Ok(text)) => {
                        if let Some(delay) = slow_mo {
                            sleep(delay).await;
                        }

                        let Some(inner) = inner.upgrade() else {
                            break;
                        };

                        trace!(target: PROTOCOL_TARGET, message = %text, "◀ RECV");
                        inner.dispatch(&text);
                    }

                    Some(Err(e)) => {
                        warn!(error = %e, "Transport read failed");
                        break;
                    }

                    None => {
                        debug!("Transport closed by remote");
                        break;
                    }
                }
            }

            // Commands from Connection and Session handles
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Message { id, text }) => {
                        trace!(target: PROTOCOL_TARGET, message = %text, "SEND ►");

                        if let Err(e) = sink.send(text).await {
                            warn!(%id, error = %e, "Transport write failed");
                            break;
                        }
                    }

                    Some(Outbound::Close) => {
                        debug!("Close requested");
                        let _ = sink.close().await;
                        break;
                    }

                    None => {
                        debug!("All connection handles dropped");
                        let _ = sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.teardown();
    }

    debug!("Event loop terminated");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio_test::{assert_err, assert_ok};

    use crate::test_support::{RemoteEnd, connect_pipe, sync};

    fn default_pipe() -> (Connection, RemoteEnd) {
        connect_pipe(ConnectionOptions::default())
    }

    #[tokio::test]
    async fn test_send_resolves_with_result_unchanged() {
        let (connection, mut remote) = default_pipe();

        let (result, ()) = tokio::join!(connection.send("Browser.getVersion", json!({})), async {
            let command = remote.next_command().await;
            assert_eq!(command["method"], "Browser.getVersion");
            assert!(command.get("sessionId").is_none());
            remote
                .respond(&command, json!({"product": "Chrome/140", "nested": {"a": [1, 2]}}))
                .await;
        });

        assert_eq!(
            assert_ok!(result),
            json!({"product": "Chrome/140", "nested": {"a": [1, 2]}})
        );
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_strictly_increase_and_match_out_of_order() {
        let (connection, mut remote) = default_pipe();

        let (a, b, c, ()) = tokio::join!(
            connection.send("Test.a", json!({})),
            connection.send("Test.b", json!({})),
            connection.send("Test.c", json!({})),
            async {
                let mut commands = Vec::new();
                for _ in 0..3 {
                    commands.push(remote.next_command().await);
                }

                let ids: Vec<u64> = commands.iter().map(|c| c["id"].as_u64().expect("id")).collect();
                assert!(ids.windows(2).all(|w| w[0] < w[1]));

                for command in commands.iter().rev() {
                    let method = command["method"].clone();
                    remote.respond(command, json!({ "method": method })).await;
                }
            }
        );

        assert_eq!(assert_ok!(a), json!({"method": "Test.a"}));
        assert_eq!(assert_ok!(b), json!({"method": "Test.b"}));
        assert_eq!(assert_ok!(c), json!({"method": "Test.c"}));
    }

    #[tokio::test]
    async fn test_protocol_error_carries_method_and_message() {
        let (connection, mut remote) = default_pipe();

        let (result, ()) = tokio::join!(connection.send("Page.navigate", json!({})), async {
            let command = remote.next_command().await;
            remote.fail(&command, "Cannot navigate to invalid URL").await;
        });

        let err = assert_err!(result);
        assert_eq!(
            err.to_string(),
            "Protocol error (Page.navigate): Cannot navigate to invalid URL"
        );
    }

    #[tokio::test]
    async fn test_unknown_response_id_ignored() {
        let (connection, mut remote) = default_pipe();

        remote.send_json(json!({"id": 999, "result": {}})).await;
        remote.send_json(json!("not an object")).await;
        sync(&connection, &mut remote).await;

        assert!(!connection.is_closed());
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_browser_events_published() {
        let (connection, mut remote) = default_pipe();
        let mut events = connection.subscribe();

        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        let _listener = connection.listen(move |event| {
            if event.method == "Target.targetCreated" {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        remote
            .emit("Target.targetCreated", json!({"targetInfo": {}}), None)
            .await;
        sync(&connection, &mut remote).await;

        let event = events.try_recv().expect("queued event");
        assert_eq!(event.method, "Target.targetCreated");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attach_creates_session_and_routes_traffic() {
        let (connection, mut remote) = default_pipe();

        remote.attach("S1", "T1", "page").await;
        sync(&connection, &mut remote).await;

        let session = connection.session(&SessionId::new("S1")).expect("session");
        assert_eq!(session.target_type(), "page");
        let mut session_events = session.subscribe();
        let mut browser_events = connection.subscribe();

        let (result, ()) = tokio::join!(session.send("Page.enable", json!({})), async {
            let command = remote.next_command().await;
            assert_eq!(command["sessionId"], "S1");
            remote
                .emit("Page.loadEventFired", json!({"timestamp": 1.0}), Some("S1"))
                .await;
            remote.respond(&command, json!({"scoped": true})).await;
        });

        assert_eq!(assert_ok!(result), json!({"scoped": true}));
        let event = session_events.try_recv().expect("session event");
        assert_eq!(event.method, "Page.loadEventFired");
        assert!(browser_events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_response_with_session_id_does_not_settle_connection_entry() {
        let (connection, mut remote) = default_pipe();

        let (result, ()) = tokio::join!(
            connection.send_with_timeout("Test.a", json!({}), Duration::from_millis(200)),
            async {
                let command = remote.next_command().await;
                // Same id but scoped to a session: must not complete the
                // browser-level command.
                remote
                    .send_json(json!({"id": command["id"], "result": {}, "sessionId": "S9"}))
                    .await;
            }
        );

        assert!(matches!(result, Err(Error::CommandTimeout { .. })));
    }

    #[tokio::test]
    async fn test_detach_rejects_session_pending() {
        let (connection, mut remote) = default_pipe();
        remote.attach("S1", "T1", "page").await;
        sync(&connection, &mut remote).await;
        let session = connection.session(&SessionId::new("S1")).expect("session");

        let (result, ()) = tokio::join!(session.send("Runtime.evaluate", json!({})), async {
            let _command = remote.next_command().await;
            remote
                .emit("Target.detachedFromTarget", json!({"sessionId": "S1"}), None)
                .await;
        });

        let err = assert_err!(result);
        assert!(matches!(err, Error::TargetClosed { ref method } if method == "Runtime.evaluate"));
        assert!(session.is_closed());
        assert_eq!(session.pending_count(), 0);
        assert_eq!(connection.session_count(), 0);

        let late = session.send("Runtime.evaluate", json!({})).await;
        assert!(matches!(late, Err(Error::TargetClosed { .. })));
    }

    #[tokio::test]
    async fn test_transport_close_rejects_everything() {
        let (connection, mut remote) = default_pipe();
        for (session, target) in [("S1", "T1"), ("S2", "T2"), ("S3", "T3")] {
            remote.attach(session, target, "page").await;
        }
        sync(&connection, &mut remote).await;
        assert_eq!(connection.session_count(), 3);

        let sessions = connection.sessions();
        let sends = sessions
            .iter()
            .map(|s| s.send("Runtime.evaluate", json!({"expression": "1"})));
        let browser_send = connection.send("Browser.getVersion", json!({}));

        let (results, browser_result, ()) = tokio::join!(
            futures_util::future::join_all(sends),
            browser_send,
            async {
                for _ in 0..4 {
                    remote.next_command().await;
                }
                remote.shutdown().await;
            }
        );

        for result in results {
            assert!(matches!(result, Err(Error::TargetClosed { .. })));
        }
        assert!(matches!(browser_result, Err(Error::TargetClosed { .. })));

        let mut closed = connection.closed();
        assert_ok!(closed.wait_for(|c| *c).await);
        assert!(connection.is_closed());
        assert_eq!(connection.session_count(), 0);
        assert_eq!(connection.pending_count(), 0);
        for session in &sessions {
            assert!(session.is_closed());
            assert_eq!(session.pending_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_send_after_close_fails_immediately() {
        let (connection, _remote) = default_pipe();
        connection.close();
        connection.close();

        assert!(connection.is_closed());
        let result = connection.send("Browser.getVersion", json!({})).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_timeout_removes_entry_and_late_response_is_ignored() {
        let (connection, mut remote) = default_pipe();

        let result = connection
            .send_with_timeout("Test.slow", json!({}), Duration::from_millis(20))
            .await;
        assert!(matches!(
            result,
            Err(Error::CommandTimeout { ref method, timeout_ms: 20 }) if method == "Test.slow"
        ));
        assert_eq!(connection.pending_count(), 0);

        let command = remote.next_command().await;
        remote.respond(&command, json!({})).await;
        sync(&connection, &mut remote).await;
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn test_pending_limit() {
        let (connection, _remote) =
            connect_pipe(ConnectionOptions::new().with_max_pending_commands(1));

        let first = connection.clone();
        let _held = tokio::spawn(async move { first.send("Test.hold", json!({})).await });

        // Wait until the first command occupies the table.
        while connection.pending_count() == 0 {
            tokio::task::yield_now().await;
        }

        let result = connection.send("Test.extra", json!({})).await;
        assert!(matches!(
            result,
            Err(Error::TooManyPendingCommands { pending: 1, max: 1 })
        ));
    }

    #[tokio::test]
    async fn test_create_session() {
        let (connection, mut remote) = default_pipe();
        let target = TargetId::new("T7");

        let (session, ()) = tokio::join!(connection.create_session(&target), async {
            let command = remote.next_command().await;
            assert_eq!(command["method"], "Target.attachToTarget");
            assert_eq!(command["params"], json!({"targetId": "T7", "flatten": true}));
            remote.attach("S7", "T7", "iframe").await;
            remote.respond(&command, json!({"sessionId": "S7"})).await;
        });

        let session = assert_ok!(session);
        assert_eq!(session.id().as_str(), "S7");
        assert_eq!(session.target_id().as_str(), "T7");
        assert_eq!(session.target_type(), "iframe");
    }

    #[tokio::test]
    async fn test_create_session_without_announcement() {
        let (connection, mut remote) = default_pipe();
        let target = TargetId::new("T1");

        let (session, ()) = tokio::join!(
            connection.create_session(&target),
            async {
                let command = remote.next_command().await;
                remote.respond(&command, json!({"sessionId": "ghost"})).await;
            }
        );

        assert!(matches!(session, Err(Error::SessionNotFound { .. })));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let (local, _remote) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(local);
        let result = Connection::builder()
            .max_pending_commands(0)
            .pipe(writer, reader);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_from_transport_outside_runtime() {
        let (local, _remote) = tokio::io::duplex(64);
        let (reader, writer) = tokio::io::split(local);
        let result = Connection::builder().pipe(writer, reader);
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn test_slow_mo_delays_dispatch() {
        let (connection, mut remote) =
            connect_pipe(ConnectionOptions::new().with_slow_mo(Duration::from_millis(30)));

        let started = tokio::time::Instant::now();
        sync(&connection, &mut remote).await;
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
