#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for `SessionClient`.
//!
//! Uses the scriptable `MockConnector` from `tests/common` to drive open
//! outcomes, server frames and connection drops, and runs on a paused
//! clock so retry timing is exact.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot;
use tokio::time::Instant;
use werewolf_arena_client::{
    CloseReason, ConnectionState, RetryProgress, SessionClient, SessionConfig, SessionEvent,
    StatusBridge, StatusStore,
};

use common::{capture, next_event, settle, MockConnector, MockHandle, Plan};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

const LIFECYCLE: &[&str] = &["connect", "disconnect", "error"];

fn config() -> SessionConfig {
    SessionConfig::new("ws://arena.test")
}

fn start(plan: Vec<Plan>) -> (SessionClient, MockHandle) {
    start_with(plan, config())
}

fn start_with(plan: Vec<Plan>, config: SessionConfig) -> (SessionClient, MockHandle) {
    let (connector, handle) = MockConnector::new(plan);
    (SessionClient::new(connector, config), handle)
}

fn retrying(attempt: u32, delay_ms: u64) -> Option<RetryProgress> {
    Some(RetryProgress {
        attempt,
        max_attempts: 5,
        delay_ms,
    })
}

fn assert_close(actual: Duration, expected: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= Duration::from_millis(5),
        "expected ~{expected:?}, got {actual:?}"
    );
}

// ════════════════════════════════════════════════════════════════════
// Connect
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn connect_opens_session_endpoint() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    assert!(client.is_connected());
    assert_eq!(client.status(), ConnectionState::Connected);
    assert_eq!(client.session_id().unwrap().as_str(), "abc");

    let server = handle.next_server().await;
    assert_eq!(server.endpoint, "ws://arena.test/ws/abc");

    match next_event(&mut events).await {
        SessionEvent::Connected { session_id } => assert_eq!(session_id.as_str(), "abc"),
        other => panic!("expected Connected, got {other:?}"),
    }

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_open() {
    let (gate_tx, gate_rx) = oneshot::channel();
    let (mut client, handle) = start(vec![Plan::Gate(gate_rx)]);
    let mut events = capture(&client, LIFECYCLE);

    let client_ref = &client;
    let release = async move {
        settle().await;
        assert_eq!(client_ref.status(), ConnectionState::Connecting);
        gate_tx.send(true).unwrap();
    };
    let (a, b, c, ()) = tokio::join!(
        client.connect("abc"),
        client.connect("abc"),
        client.connect("abc"),
        release
    );

    assert!(a && b && c);
    assert_eq!(handle.open_count(), 1);
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Connected { .. }
    ));
    settle().await;
    assert!(events.try_recv().is_err(), "exactly one connect event");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_is_pending_until_the_open_resolves() {
    let (gate_tx, gate_rx) = oneshot::channel();
    let (mut client, _handle) = start(vec![Plan::Gate(gate_rx)]);

    {
        let mut connecting = tokio_test::task::spawn(client.connect("abc"));
        tokio_test::assert_pending!(connecting.poll());
        settle().await;
        tokio_test::assert_pending!(connecting.poll());
        assert_eq!(client.status(), ConnectionState::Connecting);

        gate_tx.send(true).unwrap();
        settle().await;
        assert!(connecting.is_woken());
        assert!(tokio_test::assert_ready!(connecting.poll()));
    }

    client.shutdown().await;
}

/// Register a slow handler for `event` and return the flag it sets when done.
fn slow_flag(client: &SessionClient, event: &str) -> Arc<AtomicBool> {
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    client.on(event, move |_| {
        std::thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::SeqCst);
    });
    done
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_event_is_handled_before_connect_returns() {
    let (mut client, _handle) = start(vec![]);
    let handled = slow_flag(&client, "connect");

    assert!(client.connect("abc").await);
    assert!(handled.load(Ordering::SeqCst));

    client.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn terminal_error_is_handled_before_connect_returns() {
    let (mut client, _handle) = start_with(
        vec![Plan::Refuse],
        config().with_max_reconnect_attempts(0),
    );
    let handled = slow_flag(&client, "error");

    assert!(!client.connect("abc").await);
    assert!(handled.load(Ordering::SeqCst));
    assert_eq!(client.status(), ConnectionState::Failed);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_when_already_connected_is_a_no_op() {
    let (mut client, handle) = start(vec![]);

    assert!(client.connect("abc").await);
    assert!(client.connect("abc").await);
    assert_eq!(handle.open_count(), 1);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn invalid_session_ids_are_rejected() {
    let (mut client, handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    for id in ["", "undefined", "null"] {
        assert!(!client.connect(id).await, "{id:?} must be rejected");
        match next_event(&mut events).await {
            SessionEvent::Error { terminal, .. } => assert!(!terminal),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    assert_eq!(handle.open_count(), 0);
    assert_eq!(client.status(), ConnectionState::Disconnected);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_to_another_session_switches() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let first = handle.next_server().await;
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Connected { .. }
    ));

    assert!(client.connect("xyz").await);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Disconnected {
            reason: CloseReason::ClientInitiated,
            retry: None,
        }
    );
    match next_event(&mut events).await {
        SessionEvent::Connected { session_id } => assert_eq!(session_id.as_str(), "xyz"),
        other => panic!("expected Connected, got {other:?}"),
    }

    assert!(first.is_closed());
    assert_eq!(
        handle.endpoints(),
        ["ws://arena.test/ws/abc", "ws://arena.test/ws/xyz"]
    );

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn open_timeout_counts_as_failed_attempt() {
    let (mut client, handle) = start_with(
        vec![Plan::Hang],
        config().with_connect_timeout(Duration::from_secs(2)),
    );

    let started = Instant::now();
    assert!(!client.connect("abc").await);
    assert_close(started.elapsed(), Duration::from_secs(2));
    assert_eq!(client.status(), ConnectionState::Reconnecting);
    assert_eq!(client.reconnect_attempts(), 1);

    // The retry after 1s is accepted.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(client.is_connected());
    assert_eq!(handle.open_count(), 2);

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_while_reconnecting_joins_the_retry() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect

    server.fail("connection reset");
    let _ = next_event(&mut events).await; // disconnect
    assert_eq!(client.status(), ConnectionState::Reconnecting);

    assert!(client.connect("abc").await);
    assert_eq!(handle.open_count(), 2);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Close classification and backoff
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn server_close_never_reconnects() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect

    server.close_by_server();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Disconnected {
            reason: CloseReason::ServerInitiated,
            retry: None,
        }
    );
    assert_eq!(client.status(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(handle.open_count(), 1);
    assert!(events.try_recv().is_err());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn network_failure_retries_with_linear_backoff_then_fails() {
    let mut plan = vec![Plan::Accept];
    plan.extend((0..5).map(|_| Plan::Refuse));
    let (mut client, mut handle) = start(plan);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect

    client.send("guess", json!({ "player": 3 }));
    settle().await;
    assert_eq!(
        server.sent(),
        [json!({ "type": "guess", "data": { "player": 3 } })]
    );

    let dropped_at = Instant::now();
    server.fail("connection reset");

    match next_event(&mut events).await {
        SessionEvent::Disconnected { reason, retry } => {
            assert!(matches!(reason, CloseReason::NetworkFailure(_)));
            assert_eq!(retry, retrying(1, 1000));
        }
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert_eq!(client.status(), ConnectionState::Reconnecting);
    assert_eq!(client.reconnect_attempts(), 1);

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Error {
            message: "max reconnection attempts reached (5)".into(),
            terminal: true,
        }
    );
    assert_eq!(client.status(), ConnectionState::Failed);
    assert_eq!(client.reconnect_attempts(), 5);

    // One initial open plus five retries, each n seconds after the last failure.
    let times = handle.open_times();
    assert_eq!(times.len(), 6);
    assert_close(times[1] - dropped_at, Duration::from_secs(1));
    for n in 2..=5u64 {
        let gap = times[n as usize] - times[n as usize - 1];
        assert_close(gap, Duration::from_secs(n));
    }

    // Nothing else happens once failed.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(handle.open_count(), 6);
    assert!(events.try_recv().is_err(), "exactly one error event");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn successful_reconnect_resets_attempt_counter() {
    let (mut client, mut handle) = start(vec![Plan::Accept, Plan::Refuse, Plan::Accept]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let first = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect

    first.fail("connection reset");
    match next_event(&mut events).await {
        SessionEvent::Disconnected { retry, .. } => assert_eq!(retry, retrying(1, 1000)),
        other => panic!("expected Disconnected, got {other:?}"),
    }

    // Attempt 1 is refused, attempt 2 succeeds.
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Connected { .. }
    ));
    assert_eq!(client.reconnect_attempts(), 0);

    let second = handle.next_server().await;
    second.fail("connection reset");
    match next_event(&mut events).await {
        SessionEvent::Disconnected { retry, .. } => assert_eq!(retry, retrying(1, 1000)),
        other => panic!("expected Disconnected, got {other:?}"),
    }

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn send_failure_counts_as_network_failure() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect

    server.break_sends();
    client.send("vote", json!({ "target": 2 }));

    match next_event(&mut events).await {
        SessionEvent::Disconnected { reason, retry } => {
            assert!(matches!(reason, CloseReason::NetworkFailure(_)));
            assert_eq!(retry, retrying(1, 1000));
        }
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert!(server.is_closed());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_after_failure_starts_fresh() {
    let (mut client, _handle) = start_with(
        vec![Plan::Refuse, Plan::Refuse, Plan::Accept],
        config().with_max_reconnect_attempts(1),
    );
    let mut events = capture(&client, LIFECYCLE);

    assert!(!client.connect("abc").await);
    match next_event(&mut events).await {
        SessionEvent::Error { terminal, .. } => assert!(terminal),
        other => panic!("expected Error, got {other:?}"),
    }
    assert_eq!(client.status(), ConnectionState::Failed);

    assert!(client.connect("abc").await);
    assert_eq!(client.status(), ConnectionState::Connected);
    assert_eq!(client.reconnect_attempts(), 0);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Disconnect
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn disconnect_mid_connect_wins() {
    let (gate_tx, gate_rx) = oneshot::channel();
    let (mut client, handle) = start(vec![Plan::Gate(gate_rx)]);
    let mut events = capture(&client, LIFECYCLE);

    let client_ref = &client;
    let interrupt = async move {
        settle().await;
        client_ref.disconnect();
        assert_eq!(client_ref.status(), ConnectionState::Disconnected);
        settle().await;
        // The attempt was aborted; nobody is listening on the gate any more.
        assert!(gate_tx.send(true).is_err());
    };
    let (connected, ()) = tokio::join!(client.connect("abc"), interrupt);

    assert!(!connected);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(client.status(), ConnectionState::Disconnected);
    assert_eq!(handle.open_count(), 1);
    assert!(events.try_recv().is_err(), "no lifecycle events expected");

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_retry() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect
    server.fail("connection reset");
    let _ = next_event(&mut events).await; // disconnect, retry scheduled

    client.disconnect();
    assert_eq!(client.status(), ConnectionState::Disconnected);
    assert_eq!(client.reconnect_attempts(), 0);
    assert!(client.session_id().is_none());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(handle.open_count(), 1);
    assert!(events.try_recv().is_err());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_connected_is_client_initiated() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect

    client.disconnect();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Disconnected {
            reason: CloseReason::ClientInitiated,
            retry: None,
        }
    );
    assert!(server.is_closed());

    // Idempotent, and nothing is emitted the second time.
    client.disconnect();
    settle().await;
    assert!(events.try_recv().is_err());

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Messages and handlers
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn send_while_disconnected_is_dropped() {
    let (mut client, mut handle) = start(vec![]);

    client.send("vote", json!({ "target": 1 }));
    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    settle().await;
    assert!(server.sent().is_empty());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_messages_reach_their_handler() {
    let (mut client, mut handle) = start(vec![]);
    let mut updates = capture(&client, &["game_update"]);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;

    server.push_event("connection_established", json!({ "session_id": "abc" }));
    server.push_event("chat", json!({ "text": "unhandled" }));
    server.push("not json");
    server.push_event("game_update", json!({ "round": 2 }));

    let event = next_event(&mut updates).await;
    assert_eq!(event.name(), "game_update");
    assert_eq!(event.payload(), Some(&json!({ "round": 2 })));

    client.off("game_update");
    server.push_event("game_update", json!({ "round": 3 }));
    settle().await;
    assert!(updates.try_recv().is_err());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn ping_is_answered_with_pong() {
    let (mut client, mut handle) = start(vec![]);
    let mut pings = capture(&client, &["ping"]);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;

    server.push_event("ping", json!(null));
    settle().await;

    assert_eq!(server.sent(), [json!({ "type": "pong", "data": null })]);
    assert!(pings.try_recv().is_err());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn server_error_envelope_is_reported_without_disconnecting() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect

    server.push_event("error", json!({ "message": "Game not found" }));
    server.push_event("error", json!({}));

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Error {
            message: "Game not found".into(),
            terminal: false,
        }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Error {
            message: "WebSocket error".into(),
            terminal: false,
        }
    );
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_does_not_stop_the_session() {
    let (mut client, mut handle) = start(vec![]);
    client.on("game_update", |_| panic!("handler bug"));

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    server.push_event("game_update", json!({ "round": 1 }));
    settle().await;
    assert!(client.is_connected());

    let mut updates = capture(&client, &["game_update"]);
    server.push_event("game_update", json!({ "round": 2 }));
    let event = next_event(&mut updates).await;
    assert_eq!(event.payload(), Some(&json!({ "round": 2 })));

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Status bridge
// ════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct UiState {
    log: Mutex<Vec<String>>,
}

impl UiState {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

impl StatusStore for UiState {
    fn set_connected(&self, connected: bool) {
        self.log.lock().unwrap().push(format!("connected={connected}"));
    }

    fn set_message(&self, message: String) {
        self.log.lock().unwrap().push(format!("message={message}"));
    }

    fn set_error(&self, error: String) {
        self.log.lock().unwrap().push(format!("error={error}"));
    }
}

#[tokio::test(start_paused = true)]
async fn status_bridge_mirrors_lifecycle() {
    let (mut client, mut handle) = start(vec![Plan::Accept, Plan::Accept]);
    let ui = Arc::new(UiState::default());
    let store: Arc<dyn StatusStore> = ui.clone();
    StatusBridge::new(store).attach(&client);

    assert!(client.connect("abc").await);
    settle().await;
    assert_eq!(ui.take(), ["connected=true", "message=Connected to game"]);

    let server = handle.next_server().await;
    server.fail("connection reset");
    settle().await;
    assert_eq!(
        ui.take(),
        ["connected=false", "message=Reconnecting... (1/5)"]
    );

    // Retry after 1s.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(ui.take(), ["connected=true", "message=Connected to game"]);

    let server = handle.next_server().await;
    server.close_by_server();
    settle().await;
    assert_eq!(
        ui.take(),
        ["connected=false", "message=Connection closed by server"]
    );

    StatusBridge::<dyn StatusStore>::detach(&client);
    assert!(client.connect("abc").await);
    settle().await;
    assert!(ui.take().is_empty());

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Shutdown
// ════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn shutdown_closes_connection() {
    let (mut client, mut handle) = start(vec![]);
    let mut events = capture(&client, LIFECYCLE);

    assert!(client.connect("abc").await);
    let server = handle.next_server().await;
    let _ = next_event(&mut events).await; // connect

    client.shutdown().await;
    assert!(server.is_closed());
    assert_eq!(client.status(), ConnectionState::Disconnected);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Disconnected {
            reason: CloseReason::ClientInitiated,
            retry: None,
        }
    );

    assert!(!client.connect("abc").await);
}
