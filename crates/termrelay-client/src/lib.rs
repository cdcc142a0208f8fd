//! Client side of the terminal session relay.
//!
//! [`ConnectionManager`] owns the WebSocket, [`SessionTracker`] owns the
//! lifecycle state, and [`TerminalRelay`] wires the two together for one
//! terminal widget.

mod config;
mod connection;
mod error;
mod relay;
mod tracker;

pub use config::RelayConfig;
pub use connection::{ConnectionManager, EventKind, RelayEvent, TokenSource};
pub use error::{RelayError, Result};
pub use relay::{TerminalRelay, Update};
pub use tracker::{Intent, SessionTracker, Signal, StateChange};

pub use termrelay_core::{Frame, Operation, SessionState, WireFrame};
