//! Connection state machine with bounded, linearly backed-off reconnects.
//!
//! [`ReconnectController`] is synchronous and owns no I/O. The session loop
//! feeds it transport results and executes what it hands back (open a
//! connection, arm a retry timer, deliver lifecycle events).
//!
//! Every open attempt runs under a fresh [`Epoch`]. Transport results and
//! retry timers carry the epoch they were issued under, and the controller
//! ignores any whose epoch is no longer current. That is how a
//! [`disconnect`](ReconnectController::disconnect) issued mid-connect keeps a
//! late `opened` from resurrecting the session.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::event::{CloseReason, RetryProgress, SessionEvent};
use crate::protocol::SessionId;

/// Default bound on automatic reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default delay unit; attempt `n` waits `n` times this.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1000);

/// Connection status of a session client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ConnectionState {
    /// No connection and nothing scheduled.
    #[default]
    Disconnected = 0,
    /// An open attempt is in flight.
    Connecting = 1,
    /// The connection is open.
    Connected = 2,
    /// Waiting for the retry timer before the next open attempt.
    Reconnecting = 3,
    /// Reconnect attempts ran out. Left only by explicit consumer action.
    Failed = 4,
}

impl ConnectionState {
    pub(crate) fn as_u8(self) -> u8 {
        self as u8
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Reconnecting,
            4 => Self::Failed,
            _ => Self::Disconnected,
        }
    }

    /// Returns `true` while an open attempt is in flight or scheduled.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tag identifying one open attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Epoch(u64);

impl Epoch {
    fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How many times to reconnect and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on consecutive automatic reconnect attempts.
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `n * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnect attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// What a [`connect`](ReconnectController::connect) call should do.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectDecision {
    /// Already connected to this session.
    AlreadyConnected,
    /// An attempt is already in flight or scheduled; wait for its result.
    Join,
    /// Start an open attempt under `epoch`.
    Open {
        /// Epoch the open attempt runs under.
        epoch: Epoch,
        /// Session to open.
        session_id: SessionId,
        /// Emitted when a live connection to another session was dropped.
        superseded: Option<SessionEvent>,
    },
}

/// A retry timer the session loop must arm, replacing any earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    /// Epoch the timer belongs to.
    pub epoch: Epoch,
    /// How long to wait before firing.
    pub delay: Duration,
}

/// Side effects of an accepted transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// Lifecycle events to deliver, in order.
    pub events: Vec<SessionEvent>,
    /// Retry timer to arm, if any.
    pub retry: Option<ScheduledRetry>,
}

impl Transition {
    fn emit(event: SessionEvent) -> Self {
        Self {
            events: vec![event],
            retry: None,
        }
    }
}

/// The reconnection state machine.
#[derive(Debug, Clone)]
pub struct ReconnectController {
    state: ConnectionState,
    attempts: u32,
    epoch: Epoch,
    session_id: Option<SessionId>,
    policy: RetryPolicy,
}

impl ReconnectController {
    /// Create a controller in [`ConnectionState::Disconnected`].
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            attempts: 0,
            epoch: Epoch::default(),
            session_id: None,
            policy,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Epoch of the current attempt.
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Session the controller is working on, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// The retry policy in force.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Returns `true` if `epoch` is the current one.
    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.epoch == epoch
    }

    /// Consumer asked to join `session_id`.
    pub fn connect(&mut self, session_id: SessionId) -> ConnectDecision {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Reconnecting => {
                if self.session_id.as_ref() != Some(&session_id) {
                    warn!(
                        requested = %session_id,
                        "connect called while another attempt is in flight; joining it"
                    );
                }
                ConnectDecision::Join
            }
            ConnectionState::Connected if self.session_id.as_ref() == Some(&session_id) => {
                debug!(session = %session_id, "already connected to this session");
                ConnectDecision::AlreadyConnected
            }
            ConnectionState::Connected => {
                info!(
                    from = ?self.session_id.as_ref().map(SessionId::as_str),
                    to = %session_id,
                    "switching session"
                );
                let superseded = Some(SessionEvent::Disconnected {
                    reason: CloseReason::ClientInitiated,
                    retry: None,
                });
                self.begin(session_id, superseded)
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.begin(session_id, None)
            }
        }
    }

    fn begin(&mut self, session_id: SessionId, superseded: Option<SessionEvent>) -> ConnectDecision {
        self.epoch = self.epoch.next();
        self.attempts = 0;
        self.state = ConnectionState::Connecting;
        self.session_id = Some(session_id.clone());
        debug!(epoch = %self.epoch, session = %session_id, "state: connecting");
        ConnectDecision::Open {
            epoch: self.epoch,
            session_id,
            superseded,
        }
    }

    /// The open attempt issued under `epoch` succeeded.
    ///
    /// Returns `None` if the result is stale.
    pub fn opened(&mut self, epoch: Epoch) -> Option<Transition> {
        if !self.accepts(epoch, ConnectionState::Connecting, "opened") {
            return None;
        }
        let session_id = self.session_id.clone()?;
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        info!(epoch = %epoch, session = %session_id, "state: connected");
        Some(Transition::emit(SessionEvent::Connected { session_id }))
    }

    /// The open attempt issued under `epoch` failed.
    ///
    /// Returns `None` if the result is stale.
    pub fn open_failed(&mut self, epoch: Epoch, error: &SessionError) -> Option<Transition> {
        if !self.accepts(epoch, ConnectionState::Connecting, "open failure") {
            return None;
        }
        warn!(epoch = %epoch, attempts = self.attempts, "open attempt failed: {error}");
        match self.schedule_retry() {
            Some((retry, _)) => Some(Transition {
                events: Vec::new(),
                retry: Some(retry),
            }),
            None => Some(Transition::emit(self.fail())),
        }
    }

    /// The live connection issued under `epoch` closed.
    ///
    /// Returns `None` if the notification is stale.
    pub fn closed(&mut self, epoch: Epoch, reason: CloseReason) -> Option<Transition> {
        if !self.accepts(epoch, ConnectionState::Connected, "close") {
            return None;
        }
        if !reason.should_retry() {
            self.state = ConnectionState::Disconnected;
            self.attempts = 0;
            info!(epoch = %epoch, %reason, "state: disconnected, not retrying");
            return Some(Transition::emit(SessionEvent::Disconnected {
                reason,
                retry: None,
            }));
        }
        match self.schedule_retry() {
            Some((retry, progress)) => Some(Transition {
                events: vec![SessionEvent::Disconnected {
                    reason,
                    retry: Some(progress),
                }],
                retry: Some(retry),
            }),
            None => {
                let disconnected = SessionEvent::Disconnected {
                    reason,
                    retry: None,
                };
                Some(Transition {
                    events: vec![disconnected, self.fail()],
                    retry: None,
                })
            }
        }
    }

    /// The retry timer armed under `epoch` fired.
    ///
    /// Returns the epoch and session of the next open attempt, or `None` if
    /// the timer is stale.
    pub fn retry_due(&mut self, epoch: Epoch) -> Option<(Epoch, SessionId)> {
        if !self.accepts(epoch, ConnectionState::Reconnecting, "retry timer") {
            return None;
        }
        let session_id = self.session_id.clone()?;
        self.epoch = self.epoch.next();
        self.state = ConnectionState::Connecting;
        info!(
            epoch = %self.epoch,
            attempt = self.attempts,
            max = self.policy.max_attempts,
            "state: connecting (retry)"
        );
        Some((self.epoch, session_id))
    }

    /// Consumer asked to disconnect. Always succeeds.
    ///
    /// Returns a `disconnect` event when a live connection was dropped.
    pub fn disconnect(&mut self) -> Option<SessionEvent> {
        let was_connected = self.state == ConnectionState::Connected;
        self.epoch = self.epoch.next();
        self.state = ConnectionState::Disconnected;
        self.attempts = 0;
        self.session_id = None;
        debug!(epoch = %self.epoch, "state: disconnected by consumer");
        was_connected.then_some(SessionEvent::Disconnected {
            reason: CloseReason::ClientInitiated,
            retry: None,
        })
    }

    fn accepts(&self, epoch: Epoch, expected: ConnectionState, what: &str) -> bool {
        if epoch != self.epoch || self.state != expected {
            debug!(
                epoch = %epoch,
                current = %self.epoch,
                state = %self.state,
                "discarding stale {what}"
            );
            return false;
        }
        true
    }

    fn schedule_retry(&mut self) -> Option<(ScheduledRetry, RetryProgress)> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        self.attempts += 1;
        self.state = ConnectionState::Reconnecting;
        let delay = self.policy.delay_for_attempt(self.attempts);
        info!(
            attempt = self.attempts,
            max = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "state: reconnecting"
        );
        let progress = RetryProgress {
            attempt: self.attempts,
            max_attempts: self.policy.max_attempts,
            delay_ms: delay.as_millis() as u64,
        };
        let retry = ScheduledRetry {
            epoch: self.epoch,
            delay,
        };
        Some((retry, progress))
    }

    fn fail(&mut self) -> SessionEvent {
        self.state = ConnectionState::Failed;
        let error = SessionError::RetryExhausted {
            attempts: self.attempts,
        };
        tracing::error!(epoch = %self.epoch, "state: failed, {error}");
        SessionEvent::Error {
            message: error.to_string(),
            terminal: true,
        }
    }
}

impl Default for ReconnectController {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
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

    fn sid(id: &str) -> SessionId {
        SessionId::new(id).unwrap()
    }

    fn network() -> CloseReason {
        CloseReason::NetworkFailure("reset by peer".into())
    }

    fn refused() -> SessionError {
        SessionError::Connect("refused".into())
    }

    /// Drive a fresh controller to `Connected` and return the live epoch.
    fn connected(ctl: &mut ReconnectController) -> Epoch {
        let ConnectDecision::Open { epoch, .. } = ctl.connect(sid("abc")) else {
            panic!("expected Open");
        };
        ctl.opened(epoch).unwrap();
        epoch
    }

    #[test]
    fn starts_disconnected() {
        let ctl = ReconnectController::default();
        assert_eq!(ctl.state(), ConnectionState::Disconnected);
        assert_eq!(ctl.attempts(), 0);
        assert!(ctl.session_id().is_none());
    }

    #[test]
    fn delay_is_linear_in_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(3000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(5000));
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Failed,
        ] {
            assert_eq!(ConnectionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn successful_open_emits_connect() {
        let mut ctl = ReconnectController::default();
        let ConnectDecision::Open { epoch, superseded, .. } = ctl.connect(sid("abc")) else {
            panic!("expected Open");
        };
        assert!(superseded.is_none());
        assert_eq!(ctl.state(), ConnectionState::Connecting);

        let transition = ctl.opened(epoch).unwrap();
        assert_eq!(ctl.state(), ConnectionState::Connected);
        assert_eq!(
            transition.events,
            vec![SessionEvent::Connected {
                session_id: sid("abc")
            }]
        );
        assert!(transition.retry.is_none());
    }

    #[test]
    fn overlapping_connects_join_the_attempt_in_flight() {
        let mut ctl = ReconnectController::default();
        assert!(matches!(ctl.connect(sid("abc")), ConnectDecision::Open { .. }));
        let epoch = ctl.epoch();

        for _ in 0..3 {
            assert_eq!(ctl.connect(sid("abc")), ConnectDecision::Join);
        }
        assert_eq!(ctl.connect(sid("other")), ConnectDecision::Join);
        assert_eq!(ctl.epoch(), epoch);

        // Also while waiting for a retry.
        ctl.open_failed(epoch, &refused()).unwrap();
        assert_eq!(ctl.state(), ConnectionState::Reconnecting);
        assert_eq!(ctl.connect(sid("abc")), ConnectDecision::Join);
    }

    #[test]
    fn connect_when_connected_to_same_session_is_noop() {
        let mut ctl = ReconnectController::default();
        let epoch = connected(&mut ctl);
        assert_eq!(ctl.connect(sid("abc")), ConnectDecision::AlreadyConnected);
        assert_eq!(ctl.epoch(), epoch);
    }

    #[test]
    fn connect_to_other_session_supersedes_live_one() {
        let mut ctl = ReconnectController::default();
        let old = connected(&mut ctl);

        let ConnectDecision::Open {
            epoch,
            session_id,
            superseded,
        } = ctl.connect(sid("xyz"))
        else {
            panic!("expected Open");
        };
        assert_ne!(epoch, old);
        assert_eq!(session_id, sid("xyz"));
        assert_eq!(
            superseded,
            Some(SessionEvent::Disconnected {
                reason: CloseReason::ClientInitiated,
                retry: None,
            })
        );
        // The old connection's close is now stale.
        assert!(ctl.closed(old, network()).is_none());
        assert_eq!(ctl.state(), ConnectionState::Connecting);
    }

    #[test]
    fn server_close_never_retries() {
        let mut ctl = ReconnectController::default();
        let epoch = connected(&mut ctl);

        let transition = ctl.closed(epoch, CloseReason::ServerInitiated).unwrap();
        assert_eq!(ctl.state(), ConnectionState::Disconnected);
        assert!(transition.retry.is_none());
        assert_eq!(
            transition.events,
            vec![SessionEvent::Disconnected {
                reason: CloseReason::ServerInitiated,
                retry: None,
            }]
        );
    }

    #[test]
    fn network_close_schedules_first_retry() {
        let mut ctl = ReconnectController::default();
        let epoch = connected(&mut ctl);

        let transition = ctl.closed(epoch, network()).unwrap();
        assert_eq!(ctl.state(), ConnectionState::Reconnecting);
        assert_eq!(ctl.attempts(), 1);
        assert_eq!(
            transition.retry,
            Some(ScheduledRetry {
                epoch,
                delay: Duration::from_millis(1000),
            })
        );
        assert_eq!(
            transition.events,
            vec![SessionEvent::Disconnected {
                reason: network(),
                retry: Some(RetryProgress {
                    attempt: 1,
                    max_attempts: 5,
                    delay_ms: 1000,
                }),
            }]
        );
    }

    #[test]
    fn retries_are_bounded_then_fail_once() {
        let mut ctl = ReconnectController::default();
        let epoch = connected(&mut ctl);
        let mut retry = ctl.closed(epoch, network()).unwrap().retry.unwrap();
        let mut opens = 0;
        let mut delays = vec![retry.delay];

        let terminal = loop {
            let (epoch, _) = ctl.retry_due(retry.epoch).unwrap();
            opens += 1;
            let transition = ctl.open_failed(epoch, &refused()).unwrap();
            match transition.retry {
                Some(next) => {
                    delays.push(next.delay);
                    retry = next;
                }
                None => break transition,
            }
        };

        assert_eq!(opens, 5);
        assert_eq!(ctl.state(), ConnectionState::Failed);
        assert_eq!(ctl.attempts(), 5);
        assert_eq!(
            delays,
            (1..=5)
                .map(|n| Duration::from_millis(1000 * n))
                .collect::<Vec<_>>()
        );
        assert_eq!(
            terminal.events,
            vec![SessionEvent::Error {
                message: "max reconnection attempts reached (5)".into(),
                terminal: true,
            }]
        );
        // Nothing revives it automatically.
        assert!(ctl.retry_due(ctl.epoch()).is_none());
        assert!(ctl.opened(ctl.epoch()).is_none());
    }

    #[test]
    fn initial_open_failure_enters_reconnecting() {
        let mut ctl = ReconnectController::default();
        let ConnectDecision::Open { epoch, .. } = ctl.connect(sid("abc")) else {
            panic!("expected Open");
        };
        let transition = ctl.open_failed(epoch, &refused()).unwrap();
        assert_eq!(ctl.state(), ConnectionState::Reconnecting);
        assert!(transition.events.is_empty());
        assert_eq!(transition.retry.unwrap().delay, Duration::from_millis(1000));
    }

    #[test]
    fn zero_attempt_policy_fails_immediately() {
        let mut ctl = ReconnectController::new(RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(10),
        });
        let ConnectDecision::Open { epoch, .. } = ctl.connect(sid("abc")) else {
            panic!("expected Open");
        };
        let transition = ctl.open_failed(epoch, &refused()).unwrap();
        assert_eq!(ctl.state(), ConnectionState::Failed);
        assert!(transition.retry.is_none());
        assert_eq!(transition.events.len(), 1);
    }

    #[test]
    fn successful_retry_resets_counter() {
        let mut ctl = ReconnectController::default();
        let epoch = connected(&mut ctl);
        let mut retry = ctl.closed(epoch, network()).unwrap().retry.unwrap();

        for _ in 0..3 {
            let (epoch, _) = ctl.retry_due(retry.epoch).unwrap();
            retry = ctl.open_failed(epoch, &refused()).unwrap().retry.unwrap();
        }
        assert_eq!(ctl.attempts(), 4);

        let (epoch, session) = ctl.retry_due(retry.epoch).unwrap();
        assert_eq!(session, sid("abc"));
        ctl.opened(epoch).unwrap();
        assert_eq!(ctl.attempts(), 0);
        assert_eq!(ctl.state(), ConnectionState::Connected);
    }

    #[test]
    fn disconnect_mid_connect_discards_late_results() {
        let mut ctl = ReconnectController::default();
        let ConnectDecision::Open { epoch, .. } = ctl.connect(sid("abc")) else {
            panic!("expected Open");
        };

        assert!(ctl.disconnect().is_none());
        assert_eq!(ctl.state(), ConnectionState::Disconnected);

        assert!(ctl.opened(epoch).is_none());
        assert!(ctl.open_failed(epoch, &refused()).is_none());
        assert!(ctl.closed(epoch, network()).is_none());
        assert_eq!(ctl.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_mid_retry_wait_cancels_timer() {
        let mut ctl = ReconnectController::default();
        let epoch = connected(&mut ctl);
        let retry = ctl.closed(epoch, network()).unwrap().retry.unwrap();

        ctl.disconnect();
        assert!(ctl.retry_due(retry.epoch).is_none());
        assert_eq!(ctl.attempts(), 0);
        assert_eq!(ctl.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_from_connected_emits_client_initiated() {
        let mut ctl = ReconnectController::default();
        connected(&mut ctl);
        assert_eq!(
            ctl.disconnect(),
            Some(SessionEvent::Disconnected {
                reason: CloseReason::ClientInitiated,
                retry: None,
            })
        );
        assert!(ctl.session_id().is_none());
    }

    #[test]
    fn failed_is_left_by_disconnect_or_new_connect() {
        let mut ctl = ReconnectController::new(RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::ZERO,
        });
        let ConnectDecision::Open { epoch, .. } = ctl.connect(sid("abc")) else {
            panic!("expected Open");
        };
        ctl.open_failed(epoch, &refused()).unwrap();
        assert_eq!(ctl.state(), ConnectionState::Failed);

        assert!(matches!(ctl.connect(sid("abc")), ConnectDecision::Open { .. }));
        assert_eq!(ctl.state(), ConnectionState::Connecting);
        assert_eq!(ctl.attempts(), 0);

        ctl.disconnect();
        assert_eq!(ctl.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn stale_retry_timer_from_earlier_epoch_is_ignored() {
        let mut ctl = ReconnectController::default();
        let epoch = connected(&mut ctl);
        let first = ctl.closed(epoch, network()).unwrap().retry.unwrap();
        let (epoch, _) = ctl.retry_due(first.epoch).unwrap();
        let second = ctl.open_failed(epoch, &refused()).unwrap().retry.unwrap();

        assert!(ctl.retry_due(first.epoch).is_none());
        assert!(ctl.retry_due(second.epoch).is_some());
    }
}
