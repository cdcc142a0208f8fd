//! Core types for the terminal session relay.
//!
//! This crate provides the protocol primitives: the frame envelope, its JSON
//! codec, endpoint addressing, and the session lifecycle states. Transport
//! handling lives in `termrelay-client`.

pub mod codec;
mod frame;
mod target;

pub use frame::{Frame, FrameError, Operation, WireFrame, op};
pub use target::{TargetParseError, TerminalTarget};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Terminal session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Opening the transport.
    Connecting,
    /// Normal operation.
    Connected,
    /// Server warned that the session is about to expire.
    Expiring,
    /// Session ended by the server or by the local deadline.
    Expired,
    /// Transport dropped; waiting for the user to reconnect.
    ConnectionLost,
    /// Closed by the user.
    Closed,
}

impl SessionState {
    /// Whether frames may be sent in this state.
    pub fn can_send(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Expiring)
    }

    /// Whether an explicit user action is required to leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Closed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Expiring => "expiring",
            SessionState::Expired => "expired",
            SessionState::ConnectionLost => "connection lost",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_as_snake_case() {
        let json = serde_json::to_string(&SessionState::ConnectionLost).unwrap();
        assert_eq!(json, r#""connection_lost""#);
        let back: SessionState = serde_json::from_str(r#""expiring""#).unwrap();
        assert_eq!(back, SessionState::Expiring);
    }

    #[test]
    fn only_connected_states_can_send() {
        assert!(SessionState::Connected.can_send());
        assert!(SessionState::Expiring.can_send());
        assert!(!SessionState::Connecting.can_send());
        assert!(!SessionState::ConnectionLost.can_send());
    }
}
