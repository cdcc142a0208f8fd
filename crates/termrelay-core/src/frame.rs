//! Relay frames.
//!
//! [`WireFrame`] is the envelope exactly as it travels: one JSON object with
//! PascalCase keys. [`Frame`] is the typed view; converting between the two
//! is where field requirements are enforced.

use serde::{Deserialize, Serialize};

/// Operation codes as they appear in the `Op` field.
pub mod op {
    pub const BIND: &str = "bind";
    pub const STDIN: &str = "stdin";
    pub const STDOUT: &str = "stdout";
    pub const RESIZE: &str = "resize";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const EXPIRING: &str = "expiring";
    pub const EXPIRED: &str = "expired";
    pub const EXTEND: &str = "extend";
    pub const EXTENDED: &str = "extended";
    pub const CLOSE: &str = "close";

    /// Every code with a dedicated [`Operation`](super::Operation) variant.
    pub const KNOWN: &[&str] = &[
        BIND, STDIN, STDOUT, RESIZE, PING, PONG, EXPIRING, EXPIRED, EXTEND, EXTENDED, CLOSE,
    ];

    pub fn is_known(code: &str) -> bool {
        KNOWN.contains(&code)
    }
}

/// The untyped envelope. Absent fields are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireFrame {
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "SessionID", default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
}

impl WireFrame {
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            op: op.into(),
            ..Self::default()
        }
    }
}

/// What a frame is for, with only the fields valid for that purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Bind the frame's session id to this transport.
    Bind,
    /// Keystrokes headed for the shell.
    Stdin { data: String },
    /// Output produced by the shell.
    Stdout { data: String },
    /// New terminal dimensions.
    Resize { rows: u16, cols: u16 },
    Ping,
    Pong,
    /// The server will end the session soon.
    ExpiryWarning { remaining_secs: Option<u64> },
    /// The server has ended the session.
    Expired { reason: Option<String> },
    /// Ask the server for more time.
    Extend,
    /// The server granted more time.
    Extended,
    /// Connection teardown.
    Close,
    /// An operation this client does not know. All wire fields are kept.
    Unrecognized {
        op: String,
        data: Option<String>,
        rows: Option<u16>,
        cols: Option<u16>,
    },
}

impl Operation {
    /// The `Op` code for this operation.
    pub fn code(&self) -> &str {
        match self {
            Operation::Bind => op::BIND,
            Operation::Stdin { .. } => op::STDIN,
            Operation::Stdout { .. } => op::STDOUT,
            Operation::Resize { .. } => op::RESIZE,
            Operation::Ping => op::PING,
            Operation::Pong => op::PONG,
            Operation::ExpiryWarning { .. } => op::EXPIRING,
            Operation::Expired { .. } => op::EXPIRED,
            Operation::Extend => op::EXTEND,
            Operation::Extended => op::EXTENDED,
            Operation::Close => op::CLOSE,
            Operation::Unrecognized { op: code, .. } => code,
        }
    }
}

/// A typed relay frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Session this frame belongs to. Required on `bind`.
    pub session_id: Option<String>,
    pub operation: Operation,
}

impl Frame {
    pub fn new(operation: Operation) -> Self {
        Self {
            session_id: None,
            operation,
        }
    }

    pub fn bind(session_id: impl Into<String>) -> Self {
        Self::new(Operation::Bind).with_session(session_id)
    }

    pub fn stdin(data: impl Into<String>) -> Self {
        Self::new(Operation::Stdin { data: data.into() })
    }

    pub fn stdout(data: impl Into<String>) -> Self {
        Self::new(Operation::Stdout { data: data.into() })
    }

    pub fn resize(rows: u16, cols: u16) -> Self {
        Self::new(Operation::Resize { rows, cols })
    }

    pub fn ping() -> Self {
        Self::new(Operation::Ping)
    }

    pub fn pong() -> Self {
        Self::new(Operation::Pong)
    }

    pub fn extend() -> Self {
        Self::new(Operation::Extend)
    }

    pub fn close() -> Self {
        Self::new(Operation::Close)
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Check the field requirements for this frame's operation.
    pub fn validate(&self) -> Result<(), FrameError> {
        let code = self.operation.code();
        if self.session_id.as_deref() == Some("") {
            return Err(FrameError::invalid(code, "SessionID", "must not be empty"));
        }
        match &self.operation {
            Operation::Bind if self.session_id.is_none() => {
                Err(FrameError::missing(code, "SessionID"))
            }
            Operation::Resize { rows: 0, .. } => {
                Err(FrameError::invalid(code, "Rows", "must be non-zero"))
            }
            Operation::Resize { cols: 0, .. } => {
                Err(FrameError::invalid(code, "Cols", "must be non-zero"))
            }
            Operation::Unrecognized { op: unknown, .. } if unknown.is_empty() => {
                Err(FrameError::invalid(code, "Op", "must not be empty"))
            }
            Operation::Unrecognized { op: unknown, .. } if op::is_known(unknown) => Err(
                FrameError::invalid(code, "Op", "known operation carried as unrecognized"),
            ),
            _ => Ok(()),
        }
    }
}

impl From<&Frame> for WireFrame {
    fn from(frame: &Frame) -> Self {
        let mut wire = WireFrame::new(frame.operation.code());
        wire.session_id = frame.session_id.clone();
        match &frame.operation {
            Operation::Stdin { data } | Operation::Stdout { data } => {
                wire.data = Some(data.clone());
            }
            Operation::Resize { rows, cols } => {
                wire.rows = Some(*rows);
                wire.cols = Some(*cols);
            }
            Operation::ExpiryWarning { remaining_secs } => {
                wire.data = remaining_secs.map(|secs| secs.to_string());
            }
            Operation::Expired { reason } => wire.data = reason.clone(),
            Operation::Unrecognized {
                data, rows, cols, ..
            } => {
                wire.data = data.clone();
                wire.rows = *rows;
                wire.cols = *cols;
            }
            Operation::Bind
            | Operation::Ping
            | Operation::Pong
            | Operation::Extend
            | Operation::Extended
            | Operation::Close => {}
        }
        wire
    }
}

impl TryFrom<WireFrame> for Frame {
    type Error = FrameError;

    fn try_from(wire: WireFrame) -> Result<Self, Self::Error> {
        let WireFrame {
            op: code,
            data,
            session_id,
            rows,
            cols,
        } = wire;

        let operation = match code.as_str() {
            op::BIND => Operation::Bind,
            op::STDIN => Operation::Stdin {
                data: data.ok_or_else(|| FrameError::missing(op::STDIN, "Data"))?,
            },
            op::STDOUT => Operation::Stdout {
                data: data.ok_or_else(|| FrameError::missing(op::STDOUT, "Data"))?,
            },
            op::RESIZE => Operation::Resize {
                rows: rows.ok_or_else(|| FrameError::missing(op::RESIZE, "Rows"))?,
                cols: cols.ok_or_else(|| FrameError::missing(op::RESIZE, "Cols"))?,
            },
            op::PING => Operation::Ping,
            op::PONG => Operation::Pong,
            op::EXPIRING => {
                let remaining_secs = data
                    .map(|d| {
                        d.trim().parse::<u64>().map_err(|_| {
                            FrameError::invalid(op::EXPIRING, "Data", "expected seconds remaining")
                        })
                    })
                    .transpose()?;
                Operation::ExpiryWarning { remaining_secs }
            }
            op::EXPIRED => Operation::Expired { reason: data },
            op::EXTEND => Operation::Extend,
            op::EXTENDED => Operation::Extended,
            op::CLOSE => Operation::Close,
            _ => Operation::Unrecognized {
                op: code,
                data,
                rows,
                cols,
            },
        };

        let frame = Frame {
            session_id,
            operation,
        };
        frame.validate()?;
        Ok(frame)
    }
}

/// A frame that does not satisfy the envelope rules.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{op} frame is missing required field {field}")]
    MissingField { op: String, field: &'static str },
    #[error("{op} frame has invalid {field}: {reason}")]
    InvalidField {
        op: String,
        field: &'static str,
        reason: &'static str,
    },
}

impl FrameError {
    fn missing(op: &str, field: &'static str) -> Self {
        Self::MissingField {
            op: op.to_string(),
            field,
        }
    }

    fn invalid(op: &str, field: &'static str, reason: &'static str) -> Self {
        Self::InvalidField {
            op: op.to_string(),
            field,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_requires_data() {
        let err = Frame::try_from(WireFrame::new("stdout")).unwrap_err();
        assert!(matches!(err, FrameError::MissingField { field: "Data", .. }));
    }

    #[test]
    fn resize_requires_both_dimensions() {
        let mut wire = WireFrame::new("resize");
        wire.rows = Some(40);
        let err = Frame::try_from(wire.clone()).unwrap_err();
        assert!(matches!(err, FrameError::MissingField { field: "Cols", .. }));

        wire.cols = Some(120);
        assert_eq!(Frame::try_from(wire).unwrap(), Frame::resize(40, 120));
    }

    #[test]
    fn zero_sized_resize_is_invalid() {
        let err = Frame::resize(0, 80).validate().unwrap_err();
        assert!(matches!(err, FrameError::InvalidField { field: "Rows", .. }));
    }

    #[test]
    fn bind_requires_session() {
        assert!(Frame::new(Operation::Bind).validate().is_err());
        assert!(Frame::bind("").validate().is_err());
        assert!(Frame::bind("abc").validate().is_ok());
    }

    #[test]
    fn unknown_op_is_kept() {
        let mut wire = WireFrame::new("toast");
        wire.data = Some("hello".into());
        let frame = Frame::try_from(wire.clone()).unwrap();
        assert_eq!(frame.operation.code(), "toast");
        assert_eq!(WireFrame::from(&frame), wire);
    }

    #[test]
    fn unrecognized_cannot_shadow_known_op() {
        let frame = Frame::new(Operation::Unrecognized {
            op: "stdout".into(),
            data: Some("x".into()),
            rows: None,
            cols: None,
        });
        assert!(frame.validate().is_err());
    }

    #[test]
    fn expiring_parses_remaining_seconds() {
        let mut wire = WireFrame::new("expiring");
        wire.data = Some("30".into());
        let frame = Frame::try_from(wire.clone()).unwrap();
        assert_eq!(
            frame.operation,
            Operation::ExpiryWarning {
                remaining_secs: Some(30)
            }
        );

        wire.data = Some("soon".into());
        assert!(Frame::try_from(wire).is_err());
    }
}
