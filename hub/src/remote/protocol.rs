// Remote protocol - frames exchanged between a viewer and the host
// Newline-delimited JSON over TCP; requests carry ids so responses can interleave with pushes

use serde::{Deserialize, Serialize};

/// Bumped on any breaking change to the frames below
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this are rejected on both ends
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Request message from viewer to host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum HostRequest {
    /// First frame on every connection
    Handshake { client_version: u32, token: String },
    /// Start pushing content updates for a session
    Subscribe { session_id: String },
    Unsubscribe { session_id: String },
    /// Fetch the session's current content
    PullContent { session_id: String },
    /// Type text into the running session
    SendText { session_id: String, text: String },
}

/// A request tagged with the id its response will echo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    #[serde(flatten)]
    pub request: HostRequest,
}

/// Error codes returned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostErrorCode {
    VersionMismatch,
    Unauthorized,
    UnknownSession,
    SendRejected,
    InvalidRequest,
}

/// Response message from host to viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum HostResponse {
    Handshake { protocol_version: u32 },
    Subscribed { session_id: String },
    Unsubscribed { session_id: String },
    Content { content: String, is_running: bool },
    Sent,
    Error { code: HostErrorCode, message: String },
}

/// Push notification from host to subscribed viewers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum HostNotification {
    /// A subscribed session produced new output
    ContentUpdated {
        session_id: String,
        content: String,
        is_running: bool,
    },
    /// The host stopped streaming a session
    SessionEnded { session_id: String },
}

/// Every line the host writes is one of these
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostFrame {
    Response { id: u64, response: HostResponse },
    Notification { notification: HostNotification },
}

/// Frame could not be encoded or decoded
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// Serialize a message to JSON bytes with newline delimiter
pub fn serialize_message<T: Serialize>(msg: &T) -> Result<Vec<u8>, FrameError> {
    let mut bytes = serde_json::to_vec(msg)?;
    if bytes.len() >= MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: bytes.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    bytes.push(b'\n');
    Ok(bytes)
}

/// Deserialize a message from JSON bytes (strips trailing newline)
pub fn deserialize_message<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, FrameError> {
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge {
            size: bytes.len(),
            limit: MAX_FRAME_SIZE,
        });
    }
    let trimmed = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    Ok(serde_json::from_slice(trimmed)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_wire_shape() {
        let frame = RequestFrame {
            id: 7,
            request: HostRequest::SendText {
                session_id: "s1".into(),
                text: "yes\n".into(),
            },
        };

        let bytes = serialize_message(&frame).unwrap();
        assert_eq!(bytes.last(), Some(&b'\n'));

        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["type"], "send_text");
        assert_eq!(value["sessionId"], "s1");

        let parsed: RequestFrame = deserialize_message(&bytes).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn test_content_response_uses_is_running() {
        let json = br#"{"kind":"response","id":3,"response":{"type":"content","content":"$ ls","isRunning":true}}"#;
        let frame: HostFrame = deserialize_message(json).unwrap();

        match frame {
            HostFrame::Response {
                id,
                response: HostResponse::Content { content, is_running },
            } => {
                assert_eq!(id, 3);
                assert_eq!(content, "$ ls");
                assert!(is_running);
            }
            other => panic!("Expected content response, got: {:?}", other),
        }
    }

    #[test]
    fn test_notification_frame() {
        let json = br#"{"kind":"notification","notification":{"type":"content_updated","sessionId":"s1","content":"done","isRunning":false}}"#;
        let frame: HostFrame = deserialize_message(json).unwrap();
        assert!(matches!(
            frame,
            HostFrame::Notification {
                notification: HostNotification::ContentUpdated { .. }
            }
        ));
    }

    #[test]
    fn test_error_codes_are_snake_case() {
        let response = HostResponse::Error {
            code: HostErrorCode::VersionMismatch,
            message: "client 2, host 1".into(),
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"code\":\"version_mismatch\""));
    }

    #[test]
    fn test_oversized_frames_rejected() {
        let huge = HostRequest::SendText {
            session_id: "s1".into(),
            text: "x".repeat(MAX_FRAME_SIZE),
        };
        assert!(matches!(
            serialize_message(&huge),
            Err(FrameError::TooLarge { .. })
        ));

        let bytes = vec![b' '; MAX_FRAME_SIZE + 1];
        assert!(matches!(
            deserialize_message::<HostFrame>(&bytes),
            Err(FrameError::TooLarge { .. })
        ));
    }
}
