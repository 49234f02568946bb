//! Shared fixtures for unit tests.
//!
//! | Fixture | Purpose |
//! |---------|---------|
//! | [`RemoteEnd`] | Scripted browser side of a pipe connection |
//! | [`StubChannel`] | In-memory [`CommandChannel`] with canned replies |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};
use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf, duplex, split,
};
use tokio::sync::watch;

use crate::config::ConnectionOptions;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::identifiers::SessionId;
use crate::protocol::Event;
use crate::transport::{CommandChannel, Connection, PipeTransport};

// ============================================================================
// RemoteEnd
// ============================================================================

/// Browser side of an in-memory pipe connection.
pub(crate) struct RemoteEnd {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

/// Creates a connection whose remote end is driven by the test.
pub(crate) fn connect_pipe(options: ConnectionOptions) -> (Connection, RemoteEnd) {
    let (local, remote) = duplex(1 << 16);
    let (local_read, local_write) = split(local);
    let connection = Connection::from_transport(PipeTransport::new(local_write, local_read), options)
        .expect("connection starts");

    let (remote_read, remote_write) = split(remote);
    let remote = RemoteEnd {
        reader: BufReader::new(remote_read),
        writer: remote_write,
    };

    (connection, remote)
}

impl RemoteEnd {
    /// Reads the next command written by the connection.
    pub(crate) async fn next_command(&mut self) -> Value {
        let mut frame = Vec::new();
        self.reader
            .read_until(0, &mut frame)
            .await
            .expect("read frame");
        assert_eq!(frame.pop(), Some(0), "unterminated frame");
        serde_json::from_slice(&frame).expect("command is JSON")
    }

    /// Writes one raw message.
    pub(crate) async fn send_json(&mut self, message: Value) {
        self.writer
            .write_all(message.to_string().as_bytes())
            .await
            .expect("write");
        self.writer.write_all(&[0]).await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    /// Answers `command` with `result`, echoing its session.
    pub(crate) async fn respond(&mut self, command: &Value, result: Value) {
        let mut reply = json!({ "id": command["id"], "result": result });
        if let Some(session) = command.get("sessionId") {
            reply["sessionId"] = session.clone();
        }
        self.send_json(reply).await;
    }

    /// Answers `command` with a protocol error.
    pub(crate) async fn fail(&mut self, command: &Value, message: &str) {
        let mut reply = json!({
            "id": command["id"],
            "error": { "code": -32000, "message": message },
        });
        if let Some(session) = command.get("sessionId") {
            reply["sessionId"] = session.clone();
        }
        self.send_json(reply).await;
    }

    /// Emits an event, optionally scoped to a session.
    pub(crate) async fn emit(&mut self, method: &str, params: Value, session: Option<&str>) {
        let mut event = json!({ "method": method, "params": params });
        if let Some(session) = session {
            event["sessionId"] = json!(session);
        }
        self.send_json(event).await;
    }

    /// Announces a flattened session.
    pub(crate) async fn attach(&mut self, session: &str, target: &str, target_type: &str) {
        self.emit(
            "Target.attachedToTarget",
            json!({
                "sessionId": session,
                "targetInfo": {
                    "targetId": target,
                    "type": target_type,
                    "url": "about:blank",
                    "title": "",
                },
                "waitingForDebugger": false,
            }),
            None,
        )
        .await;
    }

    /// Closes the browser-to-local direction.
    pub(crate) async fn shutdown(&mut self) {
        self.writer.shutdown().await.expect("shutdown");
    }
}

/// Round trip guaranteeing every earlier inbound message was dispatched.
pub(crate) async fn sync(connection: &Connection, remote: &mut RemoteEnd) {
    let (result, ()) = tokio::join!(connection.send("Test.sync", json!({})), async {
        let command = remote.next_command().await;
        remote.respond(&command, json!({})).await;
    });
    result.expect("sync round trip");
}

// ============================================================================
// StubChannel
// ============================================================================

/// Canned answer of a [`StubChannel`].
#[derive(Debug, Clone)]
pub(crate) enum StubReply {
    Value(Value),
    Error(String),
    /// Never answers.
    Hang,
}

/// In-memory command channel.
///
/// Commands are recorded and answered from a per-method table (`{}` by
/// default). Events are injected with [`emit`](Self::emit) and reach
/// subscribers synchronously, like the connection's dispatch path.
pub(crate) struct StubChannel {
    session_id: Option<SessionId>,
    events: EventBus<Event>,
    closed_tx: watch::Sender<bool>,
    sent: Mutex<Vec<(String, Value)>>,
    replies: Mutex<FxHashMap<String, StubReply>>,
    children: Mutex<FxHashMap<SessionId, Arc<StubChannel>>>,
}

impl StubChannel {
    pub(crate) fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// Stub scoped to a session, as a child target's channel is.
    pub(crate) fn with_session(session_id: &str) -> Arc<Self> {
        Self::build(Some(SessionId::new(session_id)))
    }

    fn build(session_id: Option<SessionId>) -> Arc<Self> {
        let (closed_tx, _) = watch::channel(false);
        Arc::new(Self {
            session_id,
            events: EventBus::new(),
            closed_tx,
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(FxHashMap::default()),
            children: Mutex::new(FxHashMap::default()),
        })
    }

    /// Makes `child` resolvable through [`CommandChannel::attached_session`].
    pub(crate) fn add_child(&self, child: &Arc<StubChannel>) {
        if let Some(id) = &child.session_id {
            self.children.lock().insert(id.clone(), Arc::clone(child));
        }
    }

    /// Emits `Target.attachedToTarget` announcing `child` as an iframe.
    pub(crate) fn attach_child(&self, child: &Arc<StubChannel>, target: &str, target_type: &str) {
        self.add_child(child);
        self.emit(
            "Target.attachedToTarget",
            json!({
                "sessionId": child.session_id,
                "targetInfo": { "targetId": target, "type": target_type, "url": "", "title": "" },
                "waitingForDebugger": false,
            }),
        );
    }

    /// Emits `Target.detachedFromTarget` for `child` and closes it.
    pub(crate) fn detach_child(&self, child: &Arc<StubChannel>) {
        if let Some(id) = &child.session_id {
            self.children.lock().remove(id);
        }
        child.disconnect();
        self.emit(
            "Target.detachedFromTarget",
            json!({ "sessionId": child.session_id }),
        );
    }

    pub(crate) fn reply(&self, method: &str, reply: StubReply) {
        self.replies.lock().insert(method.to_string(), reply);
    }

    pub(crate) fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_methods(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(m, _)| m.clone()).collect()
    }

    pub(crate) fn emit(&self, method: &str, params: Value) {
        self.events.publish(Event {
            method: method.to_string(),
            params,
            session_id: None,
        });
    }

    pub(crate) fn disconnect(&self) {
        self.closed_tx.send_replace(true);
    }
}

#[async_trait]
impl CommandChannel for StubChannel {
    async fn send(&self, method: &str, params: Value) -> Result<Value> {
        self.sent.lock().push((method.to_string(), params));
        let reply = self.replies.lock().get(method).cloned();

        match reply {
            None => Ok(json!({})),
            Some(StubReply::Value(value)) => Ok(value),
            Some(StubReply::Error(message)) => Err(Error::protocol(method, message, None)),
            Some(StubReply::Hang) => std::future::pending().await,
        }
    }

    fn events(&self) -> &EventBus<Event> {
        &self.events
    }

    fn closed(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    fn attached_session(&self, session_id: &SessionId) -> Option<Arc<dyn CommandChannel>> {
        let child: Arc<dyn CommandChannel> = self.children.lock().get(session_id).cloned()?;
        Some(child)
    }
}
