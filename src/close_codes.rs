//! WebSocket close codes and how they map onto close reasons.
//!
//! The session server closes a socket with `1000 Normal` when it is done with
//! a client. Every other code, and a socket that drops without a close frame,
//! is treated as a network failure and is eligible for reconnection.

use std::fmt;

use crate::event::CloseReason;

/// Close codes from RFC 6455 §7.4.1 that the arena server can send.
///
/// Codes outside this list are kept as [`CloseCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: the purpose of the connection has been fulfilled.
    Normal,
    /// 1001: the server is going down or the page navigated away.
    Away,
    /// 1002: protocol error.
    Protocol,
    /// 1003: unsupported data type.
    Unsupported,
    /// 1005: no status code was present.
    Status,
    /// 1006: the connection was closed abnormally.
    Abnormal,
    /// 1007: inconsistent data in a message.
    Invalid,
    /// 1008: policy violation.
    Policy,
    /// 1009: message too big.
    Size,
    /// 1011: unexpected server condition.
    Error,
    /// 1012: the server is restarting.
    Restart,
    /// 1013: try again later.
    Again,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Decode a numeric close code.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1005 => Self::Status,
            1006 => Self::Abnormal,
            1007 => Self::Invalid,
            1008 => Self::Policy,
            1009 => Self::Size,
            1011 => Self::Error,
            1012 => Self::Restart,
            1013 => Self::Again,
            other => Self::Other(other),
        }
    }

    /// The numeric value of this close code.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Protocol => 1002,
            Self::Unsupported => 1003,
            Self::Status => 1005,
            Self::Abnormal => 1006,
            Self::Invalid => 1007,
            Self::Policy => 1008,
            Self::Size => 1009,
            Self::Error => 1011,
            Self::Restart => 1012,
            Self::Again => 1013,
            Self::Other(code) => code,
        }
    }

    /// Only a normal close means the server does not want the client back.
    pub fn is_server_initiated(self) -> bool {
        matches!(self, Self::Normal)
    }

    /// Classify a close frame into a [`CloseReason`].
    pub fn classify(self, reason: &str) -> CloseReason {
        if self.is_server_initiated() {
            CloseReason::ServerInitiated
        } else if reason.is_empty() {
            CloseReason::NetworkFailure(format!("closed with code {}", self.as_u16()))
        } else {
            CloseReason::NetworkFailure(format!(
                "closed with code {}: {reason}",
                self.as_u16()
            ))
        }
    }

    /// Returns a human-readable description of the close code.
    pub fn description(self) -> &'static str {
        match self {
            Self::Normal => "Connection closed by server",
            Self::Away => "Server is going away",
            Self::Protocol => "Protocol error",
            Self::Unsupported => "Unsupported data received",
            Self::Status => "Connection closed without a status code",
            Self::Abnormal => "Connection closed abnormally",
            Self::Invalid => "Invalid message payload",
            Self::Policy => "Policy violation",
            Self::Size => "Message too big",
            Self::Error => "Internal server error",
            Self::Restart => "Server is restarting",
            Self::Again => "Server is overloaded, try again later",
            Self::Other(_) => "Connection closed",
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.as_u16())
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
    fn known_codes_decode_and_encode() {
        for code in [1000, 1001, 1002, 1003, 1005, 1006, 1007, 1008, 1009, 1011, 1012, 1013] {
            let decoded = CloseCode::from_u16(code);
            assert!(!matches!(decoded, CloseCode::Other(_)), "code {code}");
            assert_eq!(decoded.as_u16(), code);
        }
        assert_eq!(CloseCode::from_u16(4000), CloseCode::Other(4000));
    }

    #[test]
    fn normal_close_is_server_initiated() {
        assert_eq!(
            CloseCode::Normal.classify("game over"),
            CloseReason::ServerInitiated
        );
    }

    #[test]
    fn going_away_is_a_network_failure() {
        let reason = CloseCode::Away.classify("");
        assert_eq!(
            reason,
            CloseReason::NetworkFailure("closed with code 1001".into())
        );
        assert!(reason.should_retry());
    }

    #[test]
    fn network_failure_keeps_server_reason() {
        let reason = CloseCode::Error.classify("boom");
        assert_eq!(
            reason,
            CloseReason::NetworkFailure("closed with code 1011: boom".into())
        );
    }

    #[test]
    fn display_includes_number() {
        assert_eq!(
            CloseCode::Restart.to_string(),
            "Server is restarting (1012)"
        );
    }
}
