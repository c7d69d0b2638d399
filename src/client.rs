//! Async session client for Werewolf Arena live games.
//!
//! [`SessionClient`] is a thin handle over a background session loop. The
//! handle applies consumer requests to the shared [`ReconnectController`]
//! and forwards the resulting work to the loop over an unbounded MPSC
//! channel. The loop owns the connection, the pending open attempt and the
//! retry timer, and delivers every event through the [`EventDispatcher`].
//!
//! # Example
//!
//! ```rust,ignore
//! let client = SessionClient::websocket(SessionConfig::new("ws://localhost:8000"));
//!
//! client.on("game_update", |event| {
//!     if let Some(payload) = event.payload() {
//!         println!("update: {payload}");
//!     }
//! });
//! client.on("disconnect", |event| println!("{event:?}"));
//!
//! if client.connect("abc").await {
//!     client.send("guess", serde_json::json!({ "player": 3 }));
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::dispatcher::EventDispatcher;
use crate::error::{Result, SessionError};
use crate::event::{CloseReason, SessionEvent};
use crate::protocol::{session_endpoint, Envelope, SessionId, CONNECTION_ESTABLISHED};
use crate::reconnect::{
    ConnectDecision, ConnectionState, Epoch, ReconnectController, RetryPolicy, Transition,
    DEFAULT_BASE_DELAY, DEFAULT_MAX_RECONNECT_ATTEMPTS,
};
use crate::transport::{Connector, Transport};

/// Endpoint root used when none is configured.
pub const DEFAULT_BASE_URL: &str = "ws://localhost:8000";

/// Environment variable read by [`SessionConfig::from_env`].
pub const BASE_URL_ENV: &str = "WEREWOLF_ARENA_WS_URL";

/// Default timeout for one open attempt.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SessionClient`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use werewolf_arena_client::client::SessionConfig;
///
/// let config = SessionConfig::new("wss://arena.example.com")
///     .with_max_reconnect_attempts(3)
///     .with_base_delay(Duration::from_millis(500));
/// assert_eq!(config.max_reconnect_attempts, 3);
/// assert_eq!(config.connect_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Endpoint root. Sessions live at `{base_url}/ws/{session_id}`.
    pub base_url: String,
    /// Automatic reconnect attempts before giving up. Defaults to **5**.
    pub max_reconnect_attempts: u32,
    /// Reconnect attempt `n` waits `n * base_delay`. Defaults to **1 second**.
    pub base_delay: Duration,
    /// An open attempt that takes longer than this fails. Defaults to **10 seconds**.
    pub connect_timeout: Duration,
    /// How long [`SessionClient::shutdown`] waits for the loop before
    /// aborting it. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for the given endpoint root with default values.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Read the endpoint root from `WEREWOLF_ARENA_WS_URL`, falling back to
    /// `ws://localhost:8000`.
    pub fn from_env() -> Self {
        let base_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self::new(base_url)
    }

    /// Set the bound on automatic reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the reconnect delay unit.
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the timeout for one open attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            base_delay: self.base_delay,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the client handle and the session loop.
///
/// Every transition goes through [`Shared::transition`], which also refreshes
/// the lock-free mirrors read by [`SessionClient::status`].
struct Shared {
    controller: Mutex<ReconnectController>,
    status: AtomicU8,
    attempts: AtomicU32,
    dispatcher: EventDispatcher,
}

impl Shared {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            controller: Mutex::new(ReconnectController::new(policy)),
            status: AtomicU8::new(ConnectionState::Disconnected.as_u8()),
            attempts: AtomicU32::new(0),
            dispatcher: EventDispatcher::new(),
        }
    }

    fn transition<R>(&self, f: impl FnOnce(&mut ReconnectController) -> R) -> R {
        let mut controller = self
            .controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let out = f(&mut controller);
        self.status
            .store(controller.state().as_u8(), Ordering::Release);
        self.attempts.store(controller.attempts(), Ordering::Release);
        out
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.status.load(Ordering::Acquire))
    }

    fn is_current(&self, epoch: Epoch) -> bool {
        self.transition(|controller| controller.is_current(epoch))
    }

    fn deliver(&self, events: &[SessionEvent]) {
        for event in events {
            self.dispatcher.dispatch(event);
        }
    }
}

/// Work sent from the handle to the session loop.
enum Command {
    /// Start the open attempt the controller issued under `epoch`.
    Open {
        epoch: Epoch,
        session_id: SessionId,
        superseded: Option<SessionEvent>,
        reply: oneshot::Sender<bool>,
    },
    /// Wait for the outcome of the attempt already in flight.
    Join(oneshot::Sender<bool>),
    /// The consumer disconnected; drop everything in flight.
    Reset(Option<SessionEvent>),
    /// Send an envelope on the live connection.
    Send(Envelope),
    /// Deliver an event that did not come from a transition.
    Notify(SessionEvent),
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for one arena session at a time.
///
/// Created via [`SessionClient::new`], which spawns the background session
/// loop, so it must be called from within a Tokio runtime.
///
/// Only [`connect`](Self::connect) suspends. Everything else returns
/// immediately: state reads are lock-free, and writes are queued for the
/// session loop.
pub struct SessionClient {
    /// Sender half of the command channel to the session loop.
    cmd_tx: mpsc::UnboundedSender<Command>,
    /// State shared with the session loop.
    shared: Arc<Shared>,
    /// Handle to the background session loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender to signal the session loop to shut down gracefully.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
}

impl SessionClient {
    /// Spawn a session loop that opens connections with `connector`.
    pub fn new<C: Connector>(connector: C, config: SessionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let shared = Arc::new(Shared::new(config.retry_policy()));
        let shutdown_timeout = config.shutdown_timeout;

        let session_loop = SessionLoop {
            connector: Arc::new(connector),
            config,
            shared: Arc::clone(&shared),
            link: None,
            opening: None,
            retry: None,
            waiters: Vec::new(),
        };
        let task = tokio::spawn(session_loop.run(cmd_rx, shutdown_rx));

        Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        }
    }

    /// Spawn a session loop backed by WebSocket connections.
    #[cfg(feature = "transport-websocket")]
    pub fn websocket(config: SessionConfig) -> Self {
        Self::new(crate::transports::WebSocketConnector, config)
    }

    // ── Public API methods ──────────────────────────────────────────

    /// Join the session `session_id`.
    ///
    /// Resolves to `true` once the connection is open and `false` if the
    /// open attempt failed, the session id is unusable, or the consumer
    /// disconnected in the meantime. After a failed attempt the client keeps
    /// retrying in the background; watch the `disconnect` and `error`
    /// events for the outcome.
    ///
    /// Calling `connect` while an attempt is in flight or scheduled does not
    /// start another one; the call resolves with that attempt's result.
    /// Calling it while connected to another session switches sessions.
    pub async fn connect(&self, session_id: impl Into<String>) -> bool {
        let session_id = match SessionId::new(session_id) {
            Ok(id) => id,
            Err(e) => {
                warn!("rejecting connect: {e}");
                self.queue(Command::Notify(SessionEvent::Error {
                    message: e.to_string(),
                    terminal: false,
                }));
                return false;
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let command = match self.shared.transition(|c| c.connect(session_id)) {
            ConnectDecision::AlreadyConnected => return true,
            ConnectDecision::Join => Command::Join(reply_tx),
            ConnectDecision::Open {
                epoch,
                session_id,
                superseded,
            } => Command::Open {
                epoch,
                session_id,
                superseded,
                reply: reply_tx,
            },
        };

        if !self.queue(command) {
            self.shared.transition(ReconnectController::disconnect);
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Leave the current session.
    ///
    /// Cancels any pending retry, aborts an in-flight open attempt, closes
    /// the connection and resets the attempt counter. Always succeeds, and
    /// is the way out of [`ConnectionState::Failed`].
    pub fn disconnect(&self) {
        let event = self.shared.transition(ReconnectController::disconnect);
        self.queue(Command::Reset(event));
    }

    /// Send `payload` under `event` to the server.
    ///
    /// Fire-and-forget: when the client is not connected the message is
    /// logged and dropped. Check [`is_connected`](Self::is_connected) first
    /// if delivery matters.
    pub fn send(&self, event: impl Into<String>, payload: serde_json::Value) {
        let event = event.into();
        if self.status() != ConnectionState::Connected {
            warn!(event = %event, "{}", SessionError::SendWithoutConnection);
            return;
        }
        self.queue(Command::Send(Envelope::new(event, payload)));
    }

    /// Register `handler` for `event`, replacing any earlier handler.
    ///
    /// Lifecycle events are named `connect`, `disconnect` and `error`;
    /// server messages use the `type` field of their envelope.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.shared.dispatcher.on(event, handler);
    }

    /// Remove the handler for `event`. No-op if none is registered.
    pub fn off(&self, event: &str) {
        self.shared.dispatcher.off(event);
    }

    /// Shut down the client, closing the connection and stopping the
    /// background task.
    pub async fn shutdown(&mut self) {
        debug!("SessionClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Abort the loop if it does not exit in time so it cannot run detached.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.transition(ReconnectController::disconnect);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` if the session connection is open.
    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionState::Connected
    }

    /// Current connection state.
    pub fn status(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Reconnect attempts made since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// The session being joined or connected to, if any.
    pub fn session_id(&self) -> Option<SessionId> {
        self.shared
            .transition(|controller| controller.session_id().cloned())
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn queue(&self, command: Command) -> bool {
        if self.cmd_tx.send(command).is_err() {
            debug!("{}", SessionError::ClientShutDown);
            return false;
        }
        true
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("status", &self.status())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        // No executor context here to drive a graceful close; dropping the
        // loop future drops the connection.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Session loop ────────────────────────────────────────────────────

type OpenFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// The live connection and the epoch it was opened under.
struct Link<T> {
    epoch: Epoch,
    transport: T,
}

/// The open attempt in flight. Dropping it aborts the attempt.
struct Opening<T> {
    epoch: Epoch,
    future: OpenFuture<T>,
}

/// The armed retry timer. Replacing it cancels the previous one.
struct PendingRetry {
    epoch: Epoch,
    sleep: Pin<Box<Sleep>>,
}

struct SessionLoop<C: Connector> {
    connector: Arc<C>,
    config: SessionConfig,
    shared: Arc<Shared>,
    link: Option<Link<C::Transport>>,
    opening: Option<Opening<C::Transport>>,
    retry: Option<PendingRetry>,
    /// `connect` calls waiting for the outcome of the current attempt.
    waiters: Vec<oneshot::Sender<bool>>,
}

impl<C: Connector> SessionLoop<C> {
    /// Multiplex commands, the open attempt, the retry timer and inbound
    /// frames via `tokio::select!`.
    ///
    /// Exits when the shutdown signal fires or every client handle is gone.
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        debug!("session loop started");

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => {
                            debug!("command channel closed, shutting down session loop");
                            self.stop().await;
                            break;
                        }
                    }
                }

                _ = &mut shutdown_rx => {
                    debug!("shutdown signal received");
                    self.stop().await;
                    break;
                }

                (epoch, result) = open_outcome(&mut self.opening) => {
                    self.opening = None;
                    self.handle_open_outcome(epoch, result).await;
                }

                epoch = retry_elapsed(&mut self.retry) => {
                    self.retry = None;
                    let next = self.shared.transition(|c| c.retry_due(epoch));
                    if let Some((epoch, session_id)) = next {
                        self.start_open(epoch, session_id);
                    }
                }

                (epoch, incoming) = next_frame(&mut self.link) => {
                    match incoming {
                        Some(Ok(text)) => self.handle_frame(epoch, &text).await,
                        Some(Err(e)) => {
                            warn!(epoch = %epoch, "connection failed: {e}");
                            self.connection_lost(epoch, CloseReason::NetworkFailure(e.to_string()))
                                .await;
                        }
                        None => {
                            info!(epoch = %epoch, "connection closed by server");
                            self.connection_lost(epoch, CloseReason::ServerInitiated).await;
                        }
                    }
                }
            }
        }

        debug!("session loop exited");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Open {
                epoch,
                session_id,
                superseded,
                reply,
            } => {
                if !self.shared.is_current(epoch) {
                    debug!(epoch = %epoch, "open request superseded before it started");
                    let _ = reply.send(false);
                    return;
                }
                self.close_link().await;
                self.retry = None;
                if let Some(event) = superseded {
                    self.shared.dispatcher.dispatch(&event);
                }
                self.waiters.push(reply);
                self.start_open(epoch, session_id);
            }
            Command::Join(reply) => match self.shared.state() {
                ConnectionState::Connected => {
                    let _ = reply.send(true);
                }
                state if state.is_pending() => self.waiters.push(reply),
                _ => {
                    let _ = reply.send(false);
                }
            },
            Command::Reset(event) => {
                self.opening = None;
                self.retry = None;
                self.close_link().await;
                if let Some(event) = event {
                    self.shared.dispatcher.dispatch(&event);
                }
                self.resolve_waiters(false);
            }
            Command::Send(envelope) => self.send_envelope(&envelope).await,
            Command::Notify(event) => {
                self.shared.dispatcher.dispatch(&event);
            }
        }
    }

    fn start_open(&mut self, epoch: Epoch, session_id: SessionId) {
        let connector = Arc::clone(&self.connector);
        let endpoint = session_endpoint(&self.config.base_url, &session_id);
        let timeout = self.config.connect_timeout;
        info!(epoch = %epoch, endpoint = %endpoint, "opening session connection");

        let future: OpenFuture<C::Transport> = Box::pin(async move {
            match tokio::time::timeout(timeout, connector.open(&endpoint, &session_id)).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout),
            }
        });
        self.opening = Some(Opening { epoch, future });
    }

    async fn handle_open_outcome(&mut self, epoch: Epoch, result: Result<C::Transport>) {
        match result {
            Ok(mut transport) => match self.shared.transition(|c| c.opened(epoch)) {
                Some(transition) => {
                    self.link = Some(Link { epoch, transport });
                    // Handlers run before any waiting `connect` resumes.
                    self.apply(transition);
                    self.resolve_waiters(true);
                }
                None => {
                    debug!(epoch = %epoch, "closing connection opened for a superseded attempt");
                    let _ = transport.close().await;
                }
            },
            Err(e) => {
                if let Some(transition) = self.shared.transition(|c| c.open_failed(epoch, &e)) {
                    self.apply(transition);
                    self.resolve_waiters(false);
                }
            }
        }
    }

    async fn handle_frame(&mut self, epoch: Epoch, text: &str) {
        if !self.shared.is_current(epoch) {
            debug!(epoch = %epoch, "dropping frame from superseded connection");
            return;
        }
        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("failed to decode server message: {e}, raw: {text}");
                return;
            }
        };

        if envelope.is_ping() {
            debug!("answering server ping");
            self.send_envelope(&Envelope::pong()).await;
            return;
        }

        if envelope.event == CONNECTION_ESTABLISHED {
            debug!(data = %envelope.data, "server confirmed session connection");
        }

        let event = match envelope.error_message() {
            Some(message) => SessionEvent::Error {
                message,
                terminal: false,
            },
            None => SessionEvent::Message {
                name: envelope.event,
                payload: envelope.data,
            },
        };
        self.shared.dispatcher.dispatch(&event);
    }

    async fn send_envelope(&mut self, envelope: &Envelope) {
        let Some(link) = self.link.as_mut() else {
            warn!(event = %envelope.event, "{}", SessionError::SendWithoutConnection);
            return;
        };
        let json = match envelope.encode() {
            Ok(json) => json,
            Err(e) => {
                error!("failed to encode envelope: {e}");
                return;
            }
        };
        let epoch = link.epoch;
        if let Err(e) = link.transport.send(json).await {
            error!(epoch = %epoch, "transport send error: {e}");
            self.connection_lost(epoch, CloseReason::NetworkFailure(e.to_string()))
                .await;
        }
    }

    async fn connection_lost(&mut self, epoch: Epoch, reason: CloseReason) {
        if self.link.as_ref().is_some_and(|link| link.epoch == epoch) {
            self.close_link().await;
        }
        if let Some(transition) = self.shared.transition(|c| c.closed(epoch, reason)) {
            self.apply(transition);
        }
    }

    fn apply(&mut self, transition: Transition) {
        if let Some(scheduled) = transition.retry {
            debug!(epoch = %scheduled.epoch, delay = ?scheduled.delay, "arming retry timer");
            self.retry = Some(PendingRetry {
                epoch: scheduled.epoch,
                sleep: Box::pin(tokio::time::sleep(scheduled.delay)),
            });
        }
        self.shared.deliver(&transition.events);
    }

    fn resolve_waiters(&mut self, connected: bool) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(connected);
        }
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            debug!(epoch = %link.epoch, "closing session connection");
            if let Err(e) = link.transport.close().await {
                debug!("error while closing transport: {e}");
            }
        }
    }

    async fn stop(&mut self) {
        self.opening = None;
        self.retry = None;
        self.close_link().await;
        if let Some(event) = self.shared.transition(ReconnectController::disconnect) {
            self.shared.dispatcher.dispatch(&event);
        }
        self.resolve_waiters(false);
    }
}

async fn open_outcome<T>(opening: &mut Option<Opening<T>>) -> (Epoch, Result<T>) {
    match opening {
        Some(opening) => {
            let result = (&mut opening.future).await;
            (opening.epoch, result)
        }
        None => std::future::pending().await,
    }
}

async fn retry_elapsed(retry: &mut Option<PendingRetry>) -> Epoch {
    match retry {
        Some(retry) => {
            retry.sleep.as_mut().await;
            retry.epoch
        }
        None => std::future::pending().await,
    }
}

async fn next_frame<T: Transport>(link: &mut Option<Link<T>>) -> (Epoch, Option<Result<String>>) {
    match link {
        Some(link) => {
            let incoming = link.transport.recv().await;
            (link.epoch, incoming)
        }
        None => std::future::pending().await,
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// Transport whose inbound side is fed by the test through a channel.
    struct MockTransport {
        incoming: mpsc::UnboundedReceiver<Option<Result<String>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.incoming.recv().await {
                Some(item) => item,
                // Feeder dropped: keep the connection open until closed.
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Connector that accepts every open and hands the feeder to the test.
    struct MockConnector {
        opens: Arc<AtomicUsize>,
        feeders: mpsc::UnboundedSender<mpsc::UnboundedSender<Option<Result<String>>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Transport = MockTransport;

        async fn open(&self, _endpoint: &str, _session_id: &SessionId) -> Result<MockTransport> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = self.feeders.send(tx);
            Ok(MockTransport {
                incoming: rx,
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            })
        }
    }

    struct Harness {
        client: SessionClient,
        opens: Arc<AtomicUsize>,
        feeders: mpsc::UnboundedReceiver<mpsc::UnboundedSender<Option<Result<String>>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    }

    fn harness() -> Harness {
        let opens = Arc::new(AtomicUsize::new(0));
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (feeder_tx, feeders) = mpsc::unbounded_channel();
        let connector = MockConnector {
            opens: Arc::clone(&opens),
            feeders: feeder_tx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };
        let client = SessionClient::new(connector, SessionConfig::default());

        let (event_tx, events) = mpsc::unbounded_channel();
        for name in ["connect", "disconnect", "error", "game_update"] {
            let tx = event_tx.clone();
            client.on(name, move |event| {
                let _ = tx.send(event.clone());
            });
        }

        Harness {
            client,
            opens,
            feeders,
            sent,
            closed,
            events,
        }
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connect_opens_and_emits_connect() {
        let mut h = harness();
        assert!(h.client.connect("abc").await);
        assert!(h.client.is_connected());
        assert_eq!(h.client.status(), ConnectionState::Connected);
        assert_eq!(h.client.session_id().unwrap().as_str(), "abc");

        let event = h.events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Connected { .. }));
        assert_eq!(h.opens.load(Ordering::SeqCst), 1);

        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn send_encodes_envelope() {
        let mut h = harness();
        assert!(h.client.connect("abc").await);

        h.client
            .send("guess", serde_json::json!({ "player": 3 }));
        tokio::time::sleep(Duration::from_millis(20)).await;

        {
            let sent = h.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            let value: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
            assert_eq!(
                value,
                serde_json::json!({ "type": "guess", "data": { "player": 3 } })
            );
        }

        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn send_without_connection_is_dropped() {
        let mut h = harness();
        h.client.send("guess", serde_json::Value::Null);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.sent.lock().unwrap().is_empty());
        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn ping_is_answered_and_not_dispatched() {
        let mut h = harness();
        h.client.on("ping", |_| panic!("ping must not be dispatched"));
        assert!(h.client.connect("abc").await);
        let feeder = h.feeders.recv().await.unwrap();

        feeder
            .send(Some(Ok(r#"{"type":"ping"}"#.to_string())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        {
            let sent = h.sent.lock().unwrap();
            assert_eq!(sent.as_slice(), [r#"{"type":"pong","data":null}"#]);
        }

        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn server_error_envelope_becomes_error_event() {
        let mut h = harness();
        assert!(h.client.connect("abc").await);
        let _ = h.events.recv().await; // connect
        let feeder = h.feeders.recv().await.unwrap();

        feeder
            .send(Some(Ok(
                r#"{"type":"error","data":{"message":"game not found"}}"#.to_string(),
            )))
            .unwrap();

        let event = h.events.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::Error {
                message: "game not found".into(),
                terminal: false,
            }
        );
        assert!(h.client.is_connected());

        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn undecodable_frames_are_skipped() {
        let mut h = harness();
        assert!(h.client.connect("abc").await);
        let _ = h.events.recv().await; // connect
        let feeder = h.feeders.recv().await.unwrap();

        feeder.send(Some(Ok("not json".to_string()))).unwrap();
        feeder
            .send(Some(Ok(r#"{"type":"game_update","data":{"round":2}}"#.to_string())))
            .unwrap();

        let event = h.events.recv().await.unwrap();
        assert_eq!(event.name(), "game_update");
        assert_eq!(event.payload().unwrap()["round"], 2);

        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn disconnect_closes_transport_and_emits_client_initiated() {
        let mut h = harness();
        assert!(h.client.connect("abc").await);
        let _ = h.events.recv().await; // connect

        h.client.disconnect();
        assert_eq!(h.client.status(), ConnectionState::Disconnected);
        assert!(h.client.session_id().is_none());

        let event = h.events.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::Disconnected {
                reason: CloseReason::ClientInitiated,
                retry: None,
            }
        );
        assert!(h.closed.load(Ordering::Relaxed));

        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_session_id_fails_fast() {
        let mut h = harness();
        assert!(!h.client.connect("undefined").await);
        assert_eq!(h.client.status(), ConnectionState::Disconnected);

        let event = h.events.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::Error { terminal: false, .. }));
        assert_eq!(h.opens.load(Ordering::SeqCst), 0);

        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn connect_after_shutdown_returns_false() {
        let mut h = harness();
        h.client.shutdown().await;
        assert!(!h.client.connect("abc").await);
        assert_eq!(h.client.status(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let mut h = harness();
        h.client.shutdown().await;
        h.client.shutdown().await;
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let mut h = harness();
        let debug = format!("{:?}", h.client);
        assert!(debug.contains("SessionClient"));
        assert!(debug.contains("Disconnected"));
        h.client.shutdown().await;
    }

    #[test]
    fn config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.base_url, "ws://localhost:8000");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.base_delay, Duration::from_millis(1000));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn config_builder_methods() {
        let config = SessionConfig::new("ws://arena:9000")
            .with_max_reconnect_attempts(2)
            .with_base_delay(Duration::from_millis(50))
            .with_connect_timeout(Duration::from_secs(3))
            .with_shutdown_timeout(Duration::from_secs(4));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(50),
            }
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(4));
    }
}
