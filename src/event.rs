//! Events delivered to subscribers through the
//! [`EventDispatcher`](crate::dispatcher::EventDispatcher).
//!
//! Application messages relayed from the server and the synthetic lifecycle
//! notifications (`connect`, `disconnect`, `error`) share one type so that a
//! single handler table can route both.

use std::fmt;

use crate::protocol::SessionId;

/// Handler name of the lifecycle event emitted on a successful open.
pub const CONNECT_EVENT: &str = "connect";
/// Handler name of the lifecycle event emitted when a live connection ends.
pub const DISCONNECT_EVENT: &str = "disconnect";
/// Handler name of the lifecycle event emitted on errors.
pub const ERROR_EVENT: &str = "error";

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The server closed the session on purpose. Never retried.
    ServerInitiated,
    /// The connection dropped or errored. Retried while attempts remain.
    NetworkFailure(String),
    /// The consumer called [`disconnect`](crate::SessionClient::disconnect).
    ClientInitiated,
}

impl CloseReason {
    /// Returns `true` if the controller reconnects after this reason.
    pub fn should_retry(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerInitiated => f.write_str("server-initiated"),
            Self::NetworkFailure(detail) => write!(f, "network-failure: {detail}"),
            Self::ClientInitiated => f.write_str("client-initiated"),
        }
    }
}

/// Reconnect progress attached to a `disconnect` event that will be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryProgress {
    /// The attempt about to be made, starting at 1.
    pub attempt: u32,
    /// Upper bound on automatic attempts.
    pub max_attempts: u32,
    /// Delay before the attempt starts, in milliseconds.
    pub delay_ms: u64,
}

/// An event delivered to a registered handler.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session connection opened.
    Connected {
        /// Session the connection belongs to.
        session_id: SessionId,
    },
    /// A live connection ended.
    Disconnected {
        /// Why the connection ended.
        reason: CloseReason,
        /// Present when an automatic reconnect has been scheduled.
        retry: Option<RetryProgress>,
    },
    /// Something went wrong.
    ///
    /// `terminal` is `true` when the client gave up reconnecting and will
    /// stay in `Failed` until the consumer acts.
    Error {
        /// Human-readable error text.
        message: String,
        /// Whether automatic recovery has stopped.
        terminal: bool,
    },
    /// An application message relayed verbatim from the server.
    Message {
        /// Event name from the wire envelope.
        name: String,
        /// Opaque payload from the wire envelope.
        payload: serde_json::Value,
    },
}

impl SessionEvent {
    /// The handler name this event is dispatched under.
    pub fn name(&self) -> &str {
        match self {
            Self::Connected { .. } => CONNECT_EVENT,
            Self::Disconnected { .. } => DISCONNECT_EVENT,
            Self::Error { .. } => ERROR_EVENT,
            Self::Message { name, .. } => name,
        }
    }

    /// Returns `true` for `connect`, `disconnect` and `error` notifications.
    pub fn is_lifecycle(&self) -> bool {
        !matches!(self, Self::Message { .. })
    }

    /// The payload of an application message, if this is one.
    pub fn payload(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Message { payload, .. } => Some(payload),
            _ => None,
        }
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

    #[test]
    fn lifecycle_names() {
        let connected = SessionEvent::Connected {
            session_id: SessionId::new("abc").unwrap(),
        };
        let disconnected = SessionEvent::Disconnected {
            reason: CloseReason::ServerInitiated,
            retry: None,
        };
        let error = SessionEvent::Error {
            message: "x".into(),
            terminal: false,
        };
        assert_eq!(connected.name(), "connect");
        assert_eq!(disconnected.name(), "disconnect");
        assert_eq!(error.name(), "error");
        assert!(connected.is_lifecycle());
        assert!(connected.payload().is_none());
    }

    #[test]
    fn message_uses_wire_name() {
        let event = SessionEvent::Message {
            name: "game_update".into(),
            payload: serde_json::json!({ "round": 2 }),
        };
        assert_eq!(event.name(), "game_update");
        assert!(!event.is_lifecycle());
        assert_eq!(event.payload().unwrap()["round"], 2);
    }

    #[test]
    fn only_network_failures_retry() {
        assert!(CloseReason::NetworkFailure("reset".into()).should_retry());
        assert!(!CloseReason::ServerInitiated.should_retry());
        assert!(!CloseReason::ClientInitiated.should_retry());
    }
}
