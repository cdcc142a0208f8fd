use termrelay_core::{FrameError, SessionState};
use tokio_tungstenite::tungstenite;

use crate::tracker::Intent;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("not connected")]
    NotConnected,
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),
    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("session expired")]
    SessionExpired,
    #[error("frame for session {got} on transport bound to {bound}")]
    SessionMismatch { bound: String, got: String },
    #[error("invalid terminal path: {0:?}")]
    InvalidPath(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("invalid relay config: {0}")]
    InvalidConfig(String),
    #[error("bearer token is not a valid header value")]
    InvalidToken,
    #[error("cannot {intent} while {state}")]
    InvalidTransition { state: SessionState, intent: Intent },
}

pub type Result<T> = std::result::Result<T, RelayError>;
