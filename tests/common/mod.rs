#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Werewolf Arena client integration tests.
//!
//! Provides a scriptable [`MockConnector`] whose open attempts follow a
//! [`Plan`], and a channel-fed [`MockTransport`] driven from the test
//! through a [`MockServer`] handle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use werewolf_arena_client::{Connector, SessionError, SessionEvent, SessionId, Transport};

// ── Frames ──────────────────────────────────────────────────────────

/// What the mock server pushes at the client.
pub enum Frame {
    /// A text frame.
    Text(String),
    /// The server closed the session on purpose.
    ServerClose,
    /// The connection dropped.
    NetworkError(String),
}

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based transport for integration testing.
///
/// Inbound frames come from the paired [`MockServer`]. Outgoing messages
/// are recorded in `sent`.
pub struct MockTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), SessionError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SessionError::TransportSend("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SessionError>> {
        match self.incoming.recv().await {
            Some(Frame::Text(text)) => Some(Ok(text)),
            Some(Frame::ServerClose) => None,
            Some(Frame::NetworkError(reason)) => Some(Err(SessionError::TransportReceive(reason))),
            // Server handle dropped: keep the connection open until closed.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The server side of one accepted [`MockTransport`].
pub struct MockServer {
    /// Endpoint the client opened.
    pub endpoint: String,
    frames: mpsc::UnboundedSender<Frame>,
    sent: Arc<StdMutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

impl MockServer {
    /// Push a raw text frame.
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.frames.send(Frame::Text(text.into()));
    }

    /// Push an envelope `{ "type": event, "data": data }`.
    pub fn push_event(&self, event: &str, data: serde_json::Value) {
        self.push(serde_json::json!({ "type": event, "data": data }).to_string());
    }

    /// Close the session from the server side.
    pub fn close_by_server(&self) {
        let _ = self.frames.send(Frame::ServerClose);
    }

    /// Drop the connection with a network error.
    pub fn fail(&self, reason: &str) {
        let _ = self.frames.send(Frame::NetworkError(reason.to_string()));
    }

    /// Make every further client send fail.
    pub fn break_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Messages the client sent on this connection, decoded.
    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    /// Whether the client closed this connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ── MockConnector ───────────────────────────────────────────────────

/// Outcome of one scripted open attempt.
pub enum Plan {
    /// Open succeeds immediately.
    Accept,
    /// Open fails immediately.
    Refuse,
    /// Open never completes.
    Hang,
    /// Open waits for the gate; `true` accepts, `false` or a dropped
    /// sender refuses.
    Gate(oneshot::Receiver<bool>),
}

/// Connector whose open attempts follow a script. Once the script runs out
/// every open is accepted.
pub struct MockConnector {
    plan: StdMutex<VecDeque<Plan>>,
    opens: Arc<StdMutex<Vec<(String, Instant)>>>,
    accepted: mpsc::UnboundedSender<MockServer>,
}

/// The test's view of a [`MockConnector`].
pub struct MockHandle {
    opens: Arc<StdMutex<Vec<(String, Instant)>>>,
    accepted: mpsc::UnboundedReceiver<MockServer>,
}

impl MockConnector {
    /// Create a connector following `plan`, plus the handle that observes it.
    pub fn new(plan: Vec<Plan>) -> (Self, MockHandle) {
        let opens = Arc::new(StdMutex::new(Vec::new()));
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let connector = Self {
            plan: StdMutex::new(VecDeque::from(plan)),
            opens: Arc::clone(&opens),
            accepted: accepted_tx,
        };
        let handle = MockHandle {
            opens,
            accepted: accepted_rx,
        };
        (connector, handle)
    }

    fn accept(&self, endpoint: &str) -> MockTransport {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let fail_sends = Arc::new(AtomicBool::new(false));
        let server = MockServer {
            endpoint: endpoint.to_string(),
            frames: frames_tx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
            fail_sends: Arc::clone(&fail_sends),
        };
        let _ = self.accepted.send(server);
        MockTransport {
            incoming: frames_rx,
            sent,
            closed,
            fail_sends,
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn open(
        &self,
        endpoint: &str,
        _session_id: &SessionId,
    ) -> Result<MockTransport, SessionError> {
        self.opens
            .lock()
            .unwrap()
            .push((endpoint.to_string(), Instant::now()));
        let plan = self.plan.lock().unwrap().pop_front().unwrap_or(Plan::Accept);
        match plan {
            Plan::Accept => Ok(self.accept(endpoint)),
            Plan::Refuse => Err(SessionError::Connect("connection refused".into())),
            Plan::Hang => std::future::pending().await,
            Plan::Gate(gate) => {
                if gate.await.unwrap_or(false) {
                    Ok(self.accept(endpoint))
                } else {
                    Err(SessionError::Connect("connection refused".into()))
                }
            }
        }
    }
}

impl MockHandle {
    /// Number of open attempts so far.
    pub fn open_count(&self) -> usize {
        self.opens.lock().unwrap().len()
    }

    /// Endpoints opened so far, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.opens
            .lock()
            .unwrap()
            .iter()
            .map(|(endpoint, _)| endpoint.clone())
            .collect()
    }

    /// When each open attempt started, in order.
    pub fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }

    /// Wait for the next accepted connection.
    pub async fn next_server(&mut self) -> MockServer {
        self.accepted
            .recv()
            .await
            .expect("connector dropped before accepting")
    }
}

// ── Event capture ───────────────────────────────────────────────────

/// Register a forwarding handler for each name and return the receiver.
pub fn capture(
    client: &werewolf_arena_client::SessionClient,
    names: &[&str],
) -> mpsc::UnboundedReceiver<SessionEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    for name in names {
        let tx = tx.clone();
        client.on(*name, move |event| {
            let _ = tx.send(event.clone());
        });
    }
    rx
}

/// Receive the next captured event, failing the test if none arrives.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    rx.recv().await.expect("event channel closed")
}

/// Let the session loop drain its queues.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
}
