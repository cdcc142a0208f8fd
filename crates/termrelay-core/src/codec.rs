//! JSON text codec. One transport message carries exactly one frame.

use crate::frame::{Frame, FrameError, WireFrame};

/// Validate and serialize a frame.
pub fn encode(frame: &Frame) -> Result<String, FrameError> {
    frame.validate()?;
    Ok(serde_json::to_string(&WireFrame::from(frame))?)
}

/// Validate a loosely built envelope, then serialize it.
pub fn encode_wire(wire: WireFrame) -> Result<String, FrameError> {
    let frame = Frame::try_from(wire)?;
    encode(&frame)
}

/// Parse and validate an inbound text message.
pub fn decode(text: &str) -> Result<Frame, FrameError> {
    let wire: WireFrame = serde_json::from_str(text)?;
    Frame::try_from(wire)
}

/// Parse a binary message holding UTF-8 JSON.
pub fn decode_bytes(bytes: &[u8]) -> Result<Frame, FrameError> {
    let wire: WireFrame = serde_json::from_slice(bytes)?;
    Frame::try_from(wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Operation;

    #[test]
    fn decodes_stdout_payload_unchanged() {
        let frame = decode(r#"{"Op":"stdout","Data":"file1\nfile2\n"}"#).unwrap();
        assert_eq!(
            frame.operation,
            Operation::Stdout {
                data: "file1\nfile2\n".into()
            }
        );
        assert_eq!(frame.session_id, None);
    }

    #[test]
    fn encodes_resize_without_optional_fields() {
        let text = encode(&Frame::resize(40, 120)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"Op": "resize", "Rows": 40, "Cols": 120})
        );
    }

    #[test]
    fn encode_wire_rejects_resize_missing_cols() {
        let mut wire = WireFrame::new("resize");
        wire.rows = Some(40);
        assert!(matches!(
            encode_wire(wire),
            Err(FrameError::MissingField { field: "Cols", .. })
        ));
    }

    #[test]
    fn null_fields_are_absent() {
        let frame = decode(r#"{"Op":"pong","Data":null,"SessionID":null}"#).unwrap();
        assert_eq!(frame, Frame::pong());
    }

    #[test]
    fn missing_op_is_malformed() {
        assert!(matches!(
            decode(r#"{"Data":"x"}"#),
            Err(FrameError::Json(_))
        ));
        assert!(decode("not json").is_err());
    }

    #[test]
    fn session_frames_roundtrip() {
        let frames = [
            Frame::bind("sess-1"),
            Frame::stdin("ls\n").with_session("sess-1"),
            Frame::resize(24, 80).with_session("sess-1"),
            Frame::new(Operation::ExpiryWarning {
                remaining_secs: Some(45),
            }),
            Frame::new(Operation::Expired {
                reason: Some("idle".into()),
            }),
            Frame::new(Operation::Unrecognized {
                op: "toast".into(),
                data: Some("hi".into()),
                rows: Some(1),
                cols: None,
            }),
        ];
        for frame in frames {
            let text = encode(&frame).unwrap();
            assert_eq!(decode(&text).unwrap(), frame, "{text}");
        }
    }

    #[test]
    fn binary_messages_decode() {
        let frame = decode_bytes(br#"{"Op":"extended","SessionID":"s"}"#).unwrap();
        assert_eq!(frame, Frame::new(Operation::Extended).with_session("s"));
    }
}
