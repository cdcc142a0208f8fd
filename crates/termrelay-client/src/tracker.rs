//! Session lifecycle tracking.
//!
//! The tracker performs no I/O. It turns transport and protocol signals into
//! [`SessionState`] transitions and reports each one as a [`StateChange`],
//! both to its caller and to broadcast subscribers such as a status bar.

use std::fmt;
use std::time::Duration;
use termrelay_core::{Frame, SessionState};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{info, trace};

use crate::error::{RelayError, Result};

/// Longest wait honored for a single expiry warning.
const MAX_EXPIRY_WAIT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Inputs produced by the transport or the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    TransportOpened,
    TransportLost { reason: String },
    ExpiryWarning { remaining: Duration },
    ExtensionGranted,
    ServerExpired { reason: Option<String> },
    /// The local expiry deadline passed.
    DeadlineElapsed,
}

impl Signal {
    pub fn is_server_expiry(&self) -> bool {
        matches!(self, Signal::ServerExpired { .. })
    }

    /// Whether this signal is dropped from a tick that also holds a server
    /// expiry. The server's verdict outranks a transport blip.
    pub fn superseded_by_expiry(&self, tick_has_server_expiry: bool) -> bool {
        tick_has_server_expiry && matches!(self, Signal::TransportLost { .. })
    }
}

/// User actions that can be refused in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Open,
    Reconnect,
    ExtendSession,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Intent::Open => "open",
            Intent::Reconnect => "reconnect",
            Intent::ExtendSession => "extend the session",
        })
    }
}

/// One transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub from: SessionState,
    pub to: SessionState,
    pub reason: Option<String>,
}

pub struct SessionTracker {
    state: SessionState,
    deadline: Option<Instant>,
    /// Dropped once `Closed` has been broadcast, ending every subscription.
    changes: Option<broadcast::Sender<StateChange>>,
}

impl SessionTracker {
    pub fn new(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            state: SessionState::Connecting,
            deadline: None,
            changes: Some(changes),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// When the session expires unless extended. Set only while expiring.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Transitions as they happen. The stream ends after `Closed`.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        match &self.changes {
            Some(changes) => changes.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    /// Apply one signal. Returns the transition, if any.
    pub fn apply(&mut self, signal: Signal) -> Option<StateChange> {
        use SessionState::*;

        let (next, reason) = match (self.state, signal) {
            (Connecting, Signal::TransportOpened) => (Connected, None),
            (Connecting | Connected | Expiring, Signal::TransportLost { reason }) => {
                (ConnectionLost, Some(reason))
            }
            (Connected, Signal::ExpiryWarning { remaining }) => {
                self.deadline = Some(deadline_after(remaining));
                (
                    Expiring,
                    Some(format!("expires in {}s", remaining.as_secs())),
                )
            }
            (Expiring, Signal::ExpiryWarning { remaining }) => {
                self.deadline = Some(deadline_after(remaining));
                trace!(remaining = ?remaining, "expiry deadline refreshed");
                return None;
            }
            (Expiring, Signal::ExtensionGranted) => (Connected, Some("session extended".into())),
            (Connected | Expiring, Signal::ServerExpired { reason }) => (
                Expired,
                Some(reason.unwrap_or_else(|| "expired by server".into())),
            ),
            (Expiring, Signal::DeadlineElapsed)
                if self.deadline.is_some_and(|d| d <= Instant::now()) =>
            {
                (Expired, Some("expiry deadline passed".into()))
            }
            (state, signal) => {
                trace!(%state, ?signal, "signal ignored");
                return None;
            }
        };
        Some(self.transition(next, reason))
    }

    /// Apply the signals observed in one tick, with one result per signal
    /// in input order.
    ///
    /// A server expiry in the tick overrides any transport loss in it.
    pub fn apply_tick(&mut self, signals: Vec<Signal>) -> Vec<Option<StateChange>> {
        let server_expired = signals.iter().any(Signal::is_server_expiry);
        signals
            .into_iter()
            .map(|signal| {
                if signal.superseded_by_expiry(server_expired) {
                    trace!(?signal, "superseded by server expiry");
                    return None;
                }
                self.apply(signal)
            })
            .collect()
    }

    /// Like [`apply_tick`](Self::apply_tick), keeping only the transitions.
    pub fn apply_all(&mut self, signals: impl IntoIterator<Item = Signal>) -> Vec<StateChange> {
        self.apply_tick(signals.into_iter().collect())
            .into_iter()
            .flatten()
            .collect()
    }

    /// Start over after a lost connection or an expired session.
    pub fn reconnect(&mut self) -> Result<StateChange> {
        match self.state {
            SessionState::ConnectionLost | SessionState::Expired => {
                Ok(self.transition(SessionState::Connecting, Some("reconnect requested".into())))
            }
            state => Err(RelayError::InvalidTransition {
                state,
                intent: Intent::Reconnect,
            }),
        }
    }

    /// The frame asking the server for more time.
    pub fn extend_session(&self) -> Result<Frame> {
        match self.state {
            SessionState::Expiring => Ok(Frame::extend()),
            SessionState::Expired => Err(RelayError::SessionExpired),
            state => Err(RelayError::InvalidTransition {
                state,
                intent: Intent::ExtendSession,
            }),
        }
    }

    /// The credential behind the session is no longer valid.
    pub fn token_expired(&mut self) -> Option<StateChange> {
        match self.state {
            SessionState::Closed | SessionState::Expired => None,
            _ => Some(self.transition(SessionState::Expired, Some("token expired".into()))),
        }
    }

    /// User closed the terminal. Closing twice is a no-op.
    pub fn close(&mut self) -> Option<StateChange> {
        match self.state {
            SessionState::Closed => None,
            _ => Some(self.transition(SessionState::Closed, Some("closed by user".into()))),
        }
    }

    fn transition(&mut self, to: SessionState, reason: Option<String>) -> StateChange {
        let from = self.state;
        self.state = to;
        if to != SessionState::Expiring {
            self.deadline = None;
        }
        info!(%from, %to, reason = reason.as_deref().unwrap_or(""), "session state changed");

        let change = StateChange { from, to, reason };
        if let Some(changes) = &self.changes {
            let _ = changes.send(change.clone());
        }
        if to == SessionState::Closed {
            self.changes = None;
        }
        change
    }
}

fn deadline_after(remaining: Duration) -> Instant {
    Instant::now() + remaining.min(MAX_EXPIRY_WAIT)
}
