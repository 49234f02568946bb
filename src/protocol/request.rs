//! Command, response and raw inbound message types.
//!
//! # Wire Format
//!
//! Command (local → remote):
//!
//! ```json
//! { "id": 7, "method": "Page.navigate", "params": { ... }, "sessionId": "S1" }
//! ```
//!
//! Response (remote → local):
//!
//! ```json
//! { "id": 7, "result": { ... }, "sessionId": "S1" }
//! { "id": 7, "error": { "code": -32000, "message": "...", "data": "..." } }
//! ```
//!
//! Event (remote → local):
//!
//! ```json
//! { "method": "Page.lifecycleEvent", "params": { ... }, "sessionId": "S1" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, from_str};

use crate::error::{Error, Result};
use crate::identifiers::{CommandId, SessionId};

use super::Event;

// ============================================================================
// Command
// ============================================================================

/// A command from local end to remote end.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    /// Connection-global correlation ID.
    pub id: CommandId,

    /// Method in `Domain.method` format.
    pub method: String,

    /// Method parameters (always an object on the wire).
    pub params: Value,

    /// Target session, absent for browser-level commands.
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Command {
    /// Creates a new command.
    ///
    /// `null` params are sent as an empty object.
    #[must_use]
    pub fn new(
        id: CommandId,
        method: impl Into<String>,
        params: Value,
        session_id: Option<SessionId>,
    ) -> Self {
        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params
        };

        Self {
            id,
            method: method.into(),
            params,
            session_id,
        }
    }
}

// ============================================================================
// ErrorPayload
// ============================================================================

/// Error object carried by a failed response.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorPayload {
    /// JSON-RPC style error code.
    #[serde(default)]
    pub code: Option<i64>,

    /// Diagnostic message.
    #[serde(default)]
    pub message: String,

    /// Optional diagnostic data.
    #[serde(default)]
    pub data: Option<Value>,
}

impl ErrorPayload {
    /// Returns the diagnostic data as text.
    #[must_use]
    pub fn data_text(&self) -> Option<String> {
        match &self.data {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

// ============================================================================
// Response
// ============================================================================

/// A response to a previously sent command.
#[derive(Debug, Clone)]
pub struct Response {
    /// Matches the command `id`.
    pub id: CommandId,

    /// Result data (if success).
    pub result: Option<Value>,

    /// Error data (if error).
    pub error: Option<ErrorPayload>,

    /// Session the command was sent on.
    pub session_id: Option<SessionId>,
}

impl Response {
    /// Returns `true` if this is an error response.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Extracts the result value, or the protocol error for `method`.
    ///
    /// The result is passed through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the response carries an error.
    pub fn into_result(self, method: &str) -> Result<Value> {
        match self.error {
            Some(error) => {
                let data = error.data_text();
                Err(Error::protocol(method, error.message, data))
            }
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

// ============================================================================
// Incoming
// ============================================================================

/// Raw shape shared by every inbound message.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<CommandId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorPayload>,
    #[serde(default, rename = "sessionId")]
    session_id: Option<SessionId>,
}

/// A classified inbound message.
#[derive(Debug, Clone)]
pub enum Incoming {
    /// Response to a command.
    Response(Response),
    /// Asynchronous event.
    Event(Event),
}

impl Incoming {
    /// Parses and classifies an inbound text message.
    ///
    /// A message carrying an `id` is a response; otherwise it must carry a
    /// `method` and is an event.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not valid JSON
    /// - [`Error::Malformed`] if it has neither `id` nor `method`
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawMessage = from_str(text)?;

        if let Some(id) = raw.id {
            return Ok(Self::Response(Response {
                id,
                result: raw.result,
                error: raw.error,
                session_id: raw.session_id,
            }));
        }

        match raw.method {
            Some(method) => Ok(Self::Event(Event {
                method,
                params: raw.params.unwrap_or(Value::Null),
                session_id: raw.session_id,
            })),
            None => Err(Error::malformed("message has neither id nor method")),
        }
    }

    /// Returns the session the message is scoped to, if any.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Response(response) => response.session_id.as_ref(),
            Self::Event(event) => event.session_id.as_ref(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_serialization() {
        let command = Command::new(
            CommandId::new(3),
            "Page.navigate",
            json!({"url": "https://example.com"}),
            None,
        );
        let value: Value = serde_json::to_value(&command).expect("serialize");

        assert_eq!(value["id"], 3);
        assert_eq!(value["method"], "Page.navigate");
        assert_eq!(value["params"]["url"], "https://example.com");
        assert!(value.get("sessionId").is_none());
    }

    #[test]
    fn test_command_with_session_and_null_params() {
        let command = Command::new(
            CommandId::new(4),
            "Page.enable",
            Value::Null,
            Some(SessionId::new("S1")),
        );
        let value: Value = serde_json::to_value(&command).expect("serialize");

        assert_eq!(value["sessionId"], "S1");
        assert_eq!(value["params"], json!({}));
    }

    #[test]
    fn test_parse_success_response() {
        let incoming =
            Incoming::parse(r#"{"id": 1, "result": {"frameId": "F"}}"#).expect("parse");
        let Incoming::Response(response) = incoming else {
            panic!("expected response");
        };
        assert_eq!(response.id, CommandId::new(1));
        assert!(!response.is_error());

        let result = response.into_result("Page.navigate").expect("success");
        assert_eq!(result, json!({"frameId": "F"}));
    }

    #[test]
    fn test_parse_error_response() {
        let text = r#"{"id": 2, "error": {"code": -32000, "message": "No frame", "data": "F9"}}"#;
        let Incoming::Response(response) = Incoming::parse(text).expect("parse") else {
            panic!("expected response");
        };

        let err = response.into_result("Page.navigate").unwrap_err();
        assert_eq!(err.to_string(), "Protocol error (Page.navigate): No frame F9");
    }

    #[test]
    fn test_error_data_non_string() {
        let payload: ErrorPayload =
            serde_json::from_value(json!({"message": "x", "data": {"k": 1}})).expect("parse");
        assert_eq!(payload.data_text().as_deref(), Some(r#"{"k":1}"#));
    }

    #[test]
    fn test_parse_session_event() {
        let text = r#"{"method": "Page.loadEventFired", "params": {"timestamp": 1.5}, "sessionId": "S2"}"#;
        let incoming = Incoming::parse(text).expect("parse");

        assert_eq!(incoming.session_id().map(SessionId::as_str), Some("S2"));
        let Incoming::Event(event) = incoming else {
            panic!("expected event");
        };
        assert_eq!(event.method, "Page.loadEventFired");
    }

    #[test]
    fn test_parse_rejects_shapeless_message() {
        assert!(matches!(
            Incoming::parse(r#"{"params": {}}"#),
            Err(Error::Malformed { .. })
        ));
        assert!(matches!(Incoming::parse("not json"), Err(Error::Json(_))));
    }
}
