//! One terminal widget's relay: a connection manager driven by a session
//! tracker.

use std::collections::VecDeque;
use std::time::Duration;
use termrelay_core::{Frame, Operation, SessionState, WireFrame};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::RelayConfig;
use crate::connection::{ConnectionManager, EventKind, RelayEvent};
use crate::error::{RelayError, Result};
use crate::tracker::{Intent, SessionTracker, Signal, StateChange};

/// What the presentation layer should render next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Terminal output, exactly as the server sent it.
    Output(String),
    State(StateChange),
}

/// What one inbound frame contributes to a tick.
enum Inbound {
    Output(String),
    Signal(Signal),
}

/// One tick's worth of work, in arrival order. Each `Signal` slot takes the
/// next result of [`SessionTracker::apply_tick`].
enum Step {
    Output(String),
    Signal,
}

enum Wake {
    Events(Vec<RelayEvent>),
    Lagged(u64),
    Ended,
    Deadline,
}

pub struct TerminalRelay {
    manager: ConnectionManager,
    tracker: SessionTracker,
    events: broadcast::Receiver<RelayEvent>,
    path: Option<String>,
    pending: VecDeque<Update>,
    expiry_grace: Duration,
}

impl TerminalRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_manager(ConnectionManager::new(config))
    }

    pub fn with_manager(manager: ConnectionManager) -> Self {
        let tracker = SessionTracker::new(manager.config().event_capacity);
        let events = manager.subscribe();
        let expiry_grace = manager.config().expiry_grace();
        Self {
            manager,
            tracker,
            events,
            path: None,
            pending: VecDeque::new(),
            expiry_grace,
        }
    }

    pub fn state(&self) -> SessionState {
        self.tracker.state()
    }

    /// State changes for a status bar.
    pub fn subscribe_state(&self) -> broadcast::Receiver<StateChange> {
        self.tracker.subscribe()
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Connect to the terminal at `path`.
    ///
    /// A bad path is returned as `InvalidPath` and changes nothing. A
    /// transport failure is not returned; it arrives as a transition to
    /// `ConnectionLost`.
    pub async fn open(&mut self, path: &str) -> Result<()> {
        let state = self.tracker.state();
        if state == SessionState::Closed {
            return Err(RelayError::InvalidTransition {
                state,
                intent: Intent::Open,
            });
        }
        self.manager.config().url_for(path)?;
        self.path = Some(path.to_string());
        match state {
            SessionState::ConnectionLost | SessionState::Expired => self.reconnect().await,
            _ => self.connect().await,
        }
    }

    pub fn send_input(&mut self, data: impl Into<String>) -> Result<()> {
        self.send(Frame::stdin(data))
    }

    pub fn resize(&mut self, rows: u16, cols: u16) -> Result<()> {
        self.send(Frame::resize(rows, cols))
    }

    pub fn bind(&mut self, session_id: impl Into<String>) -> Result<()> {
        self.send(Frame::bind(session_id))
    }

    pub fn send_wire(&mut self, wire: WireFrame) -> Result<()> {
        let frame = Frame::try_from(wire)?;
        self.send(frame)
    }

    pub fn send(&mut self, frame: Frame) -> Result<()> {
        if !self.tracker.state().can_send() {
            return Err(RelayError::NotConnected);
        }
        self.manager.send(frame)
    }

    pub fn extend_session(&mut self) -> Result<()> {
        let frame = self.tracker.extend_session()?;
        self.manager.send(frame)
    }

    pub async fn reconnect(&mut self) -> Result<()> {
        let change = self.tracker.reconnect()?;
        self.pending.push_back(Update::State(change));
        self.manager.close();
        self.connect().await
    }

    pub fn token_expired(&mut self) {
        if let Some(change) = self.tracker.token_expired() {
            self.pending.push_back(Update::State(change));
        }
        self.manager.close();
    }

    /// Close the terminal. Idempotent.
    ///
    /// State subscriptions end once `Closed` has been delivered.
    pub fn close(&mut self) {
        if let Some(change) = self.tracker.close() {
            self.pending.push_back(Update::State(change));
        }
        self.manager.close();
    }

    /// Close, then end every transport event subscription as well.
    pub fn dispose(mut self) {
        self.close();
        let TerminalRelay { manager, .. } = self;
        manager.dispose();
    }

    /// Wait for the next update. Returns `None` once closed and drained.
    pub async fn next_update(&mut self) -> Option<Update> {
        loop {
            if let Some(update) = self.pending.pop_front() {
                return Some(update);
            }
            if self.tracker.state() == SessionState::Closed {
                return None;
            }

            let deadline = self.tracker.deadline();
            let wake = tokio::select! {
                event = self.events.recv() => match event {
                    Ok(first) => {
                        // Everything already queued belongs to the same tick.
                        let mut batch = vec![first];
                        while let Ok(event) = self.events.try_recv() {
                            batch.push(event);
                        }
                        Wake::Events(batch)
                    }
                    Err(RecvError::Lagged(skipped)) => Wake::Lagged(skipped),
                    Err(RecvError::Closed) => Wake::Ended,
                },
                _ = wait_until(deadline) => Wake::Deadline,
            };

            match wake {
                Wake::Events(batch) => self.process(batch),
                Wake::Lagged(skipped) => warn!(skipped, "relay events lagged"),
                Wake::Ended => return None,
                Wake::Deadline => self.apply(Signal::DeadlineElapsed),
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let path = self
            .path
            .clone()
            .ok_or_else(|| RelayError::InvalidPath(String::new()))?;
        match self.manager.connect(&path).await {
            Ok(()) => Ok(()),
            // Already published as `Failed` on the event stream.
            Err(RelayError::Transport(e)) => {
                debug!(error = %e, "open failed, reported as connection lost");
                Ok(())
            }
            // Nothing was published, so settle the state here.
            Err(e) => {
                warn!(error = %e, "open failed before the handshake");
                self.apply(Signal::TransportLost {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn process(&mut self, batch: Vec<RelayEvent>) {
        let current = self.manager.epoch();
        let mut steps = Vec::new();
        let mut signals = Vec::new();

        for event in batch {
            if event.epoch != current {
                debug!(epoch = event.epoch, current, "dropping event from replaced transport");
                continue;
            }
            match event.kind {
                EventKind::Opened { path } => {
                    debug!(%path, "transport opened");
                    signals.push(Signal::TransportOpened);
                    steps.push(Step::Signal);
                }
                EventKind::Closed { code, reason } => {
                    let reason = match code {
                        Some(code) if reason.is_empty() => format!("closed with code {code}"),
                        Some(code) => format!("closed with code {code}: {reason}"),
                        None if reason.is_empty() => "connection closed".to_string(),
                        None => reason,
                    };
                    signals.push(Signal::TransportLost { reason });
                    steps.push(Step::Signal);
                }
                EventKind::Failed(reason) => {
                    signals.push(Signal::TransportLost { reason });
                    steps.push(Step::Signal);
                }
                EventKind::Frame(frame) => match self.handle_frame(frame) {
                    Some(Inbound::Output(data)) => steps.push(Step::Output(data)),
                    Some(Inbound::Signal(signal)) => {
                        signals.push(signal);
                        steps.push(Step::Signal);
                    }
                    None => {}
                },
            }
        }

        let mut changes = self.tracker.apply_tick(signals).into_iter();
        for step in steps {
            match step {
                Step::Output(data) => self.pending.push_back(Update::Output(data)),
                Step::Signal => {
                    if let Some(change) = changes.next().flatten() {
                        self.record(change);
                    }
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Option<Inbound> {
        if let (Some(bound), Some(id)) = (self.manager.session(), frame.session_id.as_deref()) {
            if bound != id {
                warn!(
                    bound,
                    got = id,
                    op = frame.operation.code(),
                    "dropping frame for another session"
                );
                return None;
            }
        }

        let signal = match frame.operation {
            Operation::Bind => {
                if let Some(id) = frame.session_id.as_deref() {
                    if let Err(e) = self.manager.bind_session(id) {
                        warn!(error = %e, "ignoring bind");
                    }
                }
                return None;
            }
            Operation::Stdout { data } => return Some(Inbound::Output(data)),
            Operation::ExpiryWarning { remaining_secs } => Signal::ExpiryWarning {
                remaining: remaining_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.expiry_grace),
            },
            Operation::Extended => Signal::ExtensionGranted,
            Operation::Expired { reason } => Signal::ServerExpired { reason },
            Operation::Close => Signal::TransportLost {
                reason: "closed by server".to_string(),
            },
            Operation::Ping | Operation::Pong => {
                trace!("keepalive");
                return None;
            }
            Operation::Unrecognized { op, .. } => {
                debug!(%op, "ignoring unrecognized operation");
                return None;
            }
            other @ (Operation::Stdin { .. } | Operation::Resize { .. } | Operation::Extend) => {
                debug!(op = other.code(), "ignoring client-bound operation");
                return None;
            }
        };
        Some(Inbound::Signal(signal))
    }

    fn apply(&mut self, signal: Signal) {
        if let Some(change) = self.tracker.apply(signal) {
            self.record(change);
        }
    }

    fn record(&mut self, change: StateChange) {
        if matches!(
            change.to,
            SessionState::Expired | SessionState::ConnectionLost
        ) {
            self.manager.close();
        }
        self.pending.push_back(Update::State(change));
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> RelayEvent {
        RelayEvent { epoch: 0, kind }
    }

    fn opened() -> RelayEvent {
        event(EventKind::Opened {
            path: "/ws/v1/terminal/c/p".into(),
        })
    }

    fn states(relay: &mut TerminalRelay) -> Vec<SessionState> {
        relay
            .pending
            .drain(..)
            .filter_map(|update| match update {
                Update::State(change) => Some(change.to),
                Update::Output(_) => None,
            })
            .collect()
    }

    #[test]
    fn server_expiry_wins_over_transport_loss_in_one_batch() {
        let mut relay = TerminalRelay::new(RelayConfig::default());
        relay.process(vec![opened()]);
        assert_eq!(states(&mut relay), vec![SessionState::Connected]);

        relay.process(vec![
            event(EventKind::Failed("connection reset".into())),
            event(EventKind::Frame(Frame::new(Operation::Expired {
                reason: Some("session limit".into()),
            }))),
        ]);
        let pending: Vec<_> = relay.pending.drain(..).collect();
        assert_eq!(pending.len(), 1);
        match &pending[0] {
            Update::State(change) => {
                assert_eq!(change.to, SessionState::Expired);
                assert_eq!(change.reason.as_deref(), Some("session limit"));
            }
            other => panic!("expected state change, got {other:?}"),
        }
    }

    #[test]
    fn batch_keeps_arrival_order() {
        let mut relay = TerminalRelay::new(RelayConfig::default());
        relay.process(vec![
            opened(),
            event(EventKind::Frame(Frame::stdout("bye"))),
            event(EventKind::Closed {
                code: None,
                reason: String::new(),
            }),
        ]);
        let pending: Vec<_> = relay.pending.drain(..).collect();
        assert!(matches!(&pending[0], Update::State(c) if c.to == SessionState::Connected));
        assert_eq!(pending[1], Update::Output("bye".into()));
        assert!(matches!(&pending[2], Update::State(c) if c.to == SessionState::ConnectionLost));
    }

    #[test]
    fn stale_epochs_are_ignored() {
        let mut relay = TerminalRelay::new(RelayConfig::default());
        relay.process(vec![RelayEvent {
            epoch: 7,
            kind: EventKind::Opened {
                path: "/ws/v1/terminal/c/p".into(),
            },
        }]);
        assert!(relay.pending.is_empty());
        assert_eq!(relay.state(), SessionState::Connecting);
    }
}
