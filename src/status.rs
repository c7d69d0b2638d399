//! Mirrors session lifecycle into an application-level status store.
//!
//! The bridge subscribes to `connect`, `disconnect` and `error` on a
//! [`SessionClient`] and translates each event into [`StatusStore`] calls,
//! so UI state (a connected flag, a status line, the last error) follows
//! the connection without the application handling lifecycle events itself.

use std::sync::Arc;

use crate::client::SessionClient;
use crate::event::{CloseReason, SessionEvent, CONNECT_EVENT, DISCONNECT_EVENT, ERROR_EVENT};

/// Status line set when the connection opens.
pub const CONNECTED: &str = "Connected to game";
/// Status line set when the server ends the session.
pub const CLOSED_BY_SERVER: &str = "Connection closed by server";
/// Status line set when the consumer leaves the session.
pub const DISCONNECTED: &str = "Disconnected";
/// Status line set when the connection dropped and will not be retried.
pub const CONNECTION_LOST: &str = "Connection lost";

/// Application-side sink for connection status.
pub trait StatusStore: Send + Sync + 'static {
    /// Record whether the session connection is open.
    fn set_connected(&self, connected: bool);
    /// Record a human-readable status line.
    fn set_message(&self, message: String);
    /// Record the most recent error.
    fn set_error(&self, error: String);
}

/// Translates lifecycle events into [`StatusStore`] updates.
pub struct StatusBridge<S: StatusStore + ?Sized> {
    store: Arc<S>,
}

impl<S: StatusStore + ?Sized> StatusBridge<S> {
    /// Create a bridge writing to `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Apply one event to the store. Non-lifecycle events are ignored.
    pub fn apply(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Connected { .. } => {
                self.store.set_connected(true);
                self.store.set_message(CONNECTED.to_string());
            }
            SessionEvent::Disconnected { reason, retry } => {
                self.store.set_connected(false);
                let message = match (reason, retry) {
                    (_, Some(progress)) => {
                        format!(
                            "Reconnecting... ({}/{})",
                            progress.attempt, progress.max_attempts
                        )
                    }
                    (CloseReason::ServerInitiated, None) => CLOSED_BY_SERVER.to_string(),
                    (CloseReason::ClientInitiated, None) => DISCONNECTED.to_string(),
                    (CloseReason::NetworkFailure(_), None) => CONNECTION_LOST.to_string(),
                };
                self.store.set_message(message);
            }
            SessionEvent::Error { message, .. } => {
                self.store.set_error(message.clone());
            }
            SessionEvent::Message { .. } => {}
        }
    }

    /// Register the bridge's handlers on `client`.
    ///
    /// Replaces any handlers the application registered for `connect`,
    /// `disconnect` or `error`.
    pub fn attach(self, client: &SessionClient) {
        let bridge = Arc::new(self);
        for name in [CONNECT_EVENT, DISCONNECT_EVENT, ERROR_EVENT] {
            let bridge = Arc::clone(&bridge);
            client.on(name, move |event| bridge.apply(event));
        }
    }

    /// Remove the lifecycle handlers from `client`.
    pub fn detach(client: &SessionClient) {
        for name in [CONNECT_EVENT, DISCONNECT_EVENT, ERROR_EVENT] {
            client.off(name);
        }
    }
}

impl<S: StatusStore + ?Sized> Clone for StatusBridge<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
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
    use crate::event::RetryProgress;
    use crate::protocol::SessionId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        connected: Mutex<Option<bool>>,
        message: Mutex<Option<String>>,
        error: Mutex<Option<String>>,
    }

    impl StatusStore for RecordingStore {
        fn set_connected(&self, connected: bool) {
            *self.connected.lock().unwrap() = Some(connected);
        }

        fn set_message(&self, message: String) {
            *self.message.lock().unwrap() = Some(message);
        }

        fn set_error(&self, error: String) {
            *self.error.lock().unwrap() = Some(error);
        }
    }

    fn bridge() -> (Arc<RecordingStore>, StatusBridge<RecordingStore>) {
        let store = Arc::new(RecordingStore::default());
        (Arc::clone(&store), StatusBridge::new(store))
    }

    fn disconnected(reason: CloseReason, retry: Option<RetryProgress>) -> SessionEvent {
        SessionEvent::Disconnected { reason, retry }
    }

    #[test]
    fn connect_sets_connected() {
        let (store, bridge) = bridge();
        bridge.apply(&SessionEvent::Connected {
            session_id: SessionId::new("abc").unwrap(),
        });
        assert_eq!(*store.connected.lock().unwrap(), Some(true));
        assert_eq!(store.message.lock().unwrap().as_deref(), Some("Connected to game"));
    }

    #[test]
    fn server_close_message() {
        let (store, bridge) = bridge();
        bridge.apply(&disconnected(CloseReason::ServerInitiated, None));
        assert_eq!(*store.connected.lock().unwrap(), Some(false));
        assert_eq!(
            store.message.lock().unwrap().as_deref(),
            Some("Connection closed by server")
        );
    }

    #[test]
    fn retry_progress_message() {
        let (store, bridge) = bridge();
        bridge.apply(&disconnected(
            CloseReason::NetworkFailure("reset".into()),
            Some(RetryProgress {
                attempt: 2,
                max_attempts: 5,
                delay_ms: 2000,
            }),
        ));
        assert_eq!(*store.connected.lock().unwrap(), Some(false));
        assert_eq!(
            store.message.lock().unwrap().as_deref(),
            Some("Reconnecting... (2/5)")
        );
    }

    #[test]
    fn client_and_exhausted_network_messages() {
        let (store, bridge) = bridge();
        bridge.apply(&disconnected(CloseReason::ClientInitiated, None));
        assert_eq!(store.message.lock().unwrap().as_deref(), Some("Disconnected"));

        bridge.apply(&disconnected(CloseReason::NetworkFailure("reset".into()), None));
        assert_eq!(
            store.message.lock().unwrap().as_deref(),
            Some("Connection lost")
        );
    }

    #[test]
    fn error_sets_error_only() {
        let (store, bridge) = bridge();
        bridge.apply(&SessionEvent::Error {
            message: "max reconnection attempts reached (5)".into(),
            terminal: true,
        });
        assert_eq!(
            store.error.lock().unwrap().as_deref(),
            Some("max reconnection attempts reached (5)")
        );
        assert!(store.connected.lock().unwrap().is_none());
    }

    #[test]
    fn messages_are_ignored() {
        let (store, bridge) = bridge();
        bridge.apply(&SessionEvent::Message {
            name: "game_update".into(),
            payload: serde_json::Value::Null,
        });
        assert!(store.connected.lock().unwrap().is_none());
        assert!(store.message.lock().unwrap().is_none());
        assert!(store.error.lock().unwrap().is_none());
    }
}
