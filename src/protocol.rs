//! Wire types for the arena session endpoint.
//!
//! Every frame is a JSON object `{"type": <event name>, "data": <payload>}`.
//! `data` is optional on the wire and is passed through verbatim; the client
//! never looks inside it except for the `error` envelope's `message` field.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Envelope type the server sends as a keepalive probe.
pub const PING: &str = "ping";
/// Envelope type the client answers a [`PING`] with.
pub const PONG: &str = "pong";
/// Envelope type the server sends to report an error.
pub const SERVER_ERROR: &str = "error";
/// Greeting the server sends once the session socket is accepted.
pub const CONNECTION_ESTABLISHED: &str = "connection_established";

/// Opaque identifier of the game session to join.
///
/// Validated on construction: empty strings, the placeholder strings
/// `"undefined"` and `"null"`, and strings containing whitespace or URL
/// delimiters (`/`, `?`, `#`) are rejected because they cannot name a
/// session endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a session identifier.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSessionId`] for unusable identifiers.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let unusable = id.is_empty()
            || id == "undefined"
            || id == "null"
            || id
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#'));
        if unusable {
            return Err(SessionError::InvalidSessionId(id));
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the session-scoped endpoint URL: `{base_url}/ws/{session_id}`.
pub fn session_endpoint(base_url: &str, session_id: &SessionId) -> String {
    format!("{}/ws/{}", base_url.trim_end_matches('/'), session_id)
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name.
    #[serde(rename = "type")]
    pub event: String,
    /// Opaque payload. Missing on the wire decodes as `null`.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    /// Create an envelope for the given event name and payload.
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// The reply to a server [`PING`].
    pub fn pong() -> Self {
        Self::new(PONG, serde_json::Value::Null)
    }

    /// Decode an envelope from a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialization`] if the frame is not an
    /// envelope.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode this envelope as a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Serialization`] if the payload cannot be
    /// serialized.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Returns `true` for a server keepalive probe.
    pub fn is_ping(&self) -> bool {
        self.event == PING
    }

    /// The human-readable text of a server `error` envelope.
    ///
    /// Returns `None` for any other envelope type.
    pub fn error_message(&self) -> Option<String> {
        if self.event != SERVER_ERROR {
            return None;
        }
        let text = self
            .data
            .get("message")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("WebSocket error");
        Some(text.to_string())
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_id_rejects_placeholders() {
        for bad in ["", "undefined", "null", "a b", "a/b", "x?y", "x#y"] {
            let err = SessionId::new(bad).unwrap_err();
            assert!(matches!(err, SessionError::InvalidSessionId(_)), "{bad:?}");
        }
        assert_eq!(SessionId::new("game-42").unwrap().as_str(), "game-42");
    }

    #[test]
    fn session_id_deserialization_validates() {
        let ok: SessionId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(ok.as_str(), "abc");
        assert!(serde_json::from_str::<SessionId>("\"null\"").is_err());
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let id = SessionId::new("abc").unwrap();
        assert_eq!(
            session_endpoint("ws://localhost:8000", &id),
            "ws://localhost:8000/ws/abc"
        );
        assert_eq!(
            session_endpoint("ws://localhost:8000/", &id),
            "ws://localhost:8000/ws/abc"
        );
    }

    #[test]
    fn envelope_wire_shape() {
        let env = Envelope::new("guess", json!({ "player": 3 }));
        let text = env.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({ "type": "guess", "data": { "player": 3 } }));
    }

    #[test]
    fn envelope_without_data_decodes_as_null() {
        let env = Envelope::decode(r#"{"type":"ping"}"#).unwrap();
        assert!(env.is_ping());
        assert!(env.data.is_null());
    }

    #[test]
    fn envelope_without_type_is_rejected() {
        let err = Envelope::decode(r#"{"data":{}}"#).unwrap_err();
        assert!(matches!(err, SessionError::Serialization(_)));
    }

    #[test]
    fn error_message_extraction() {
        let env = Envelope::decode(r#"{"type":"error","data":{"message":"game not found"}}"#)
            .unwrap();
        assert_eq!(env.error_message().as_deref(), Some("game not found"));

        let bare = Envelope::decode(r#"{"type":"error"}"#).unwrap();
        assert_eq!(bare.error_message().as_deref(), Some("WebSocket error"));

        let other = Envelope::decode(r#"{"type":"game_update","data":{}}"#).unwrap();
        assert!(other.error_message().is_none());
    }
}
