// Control protocol - local requests to the host daemon over its Unix socket
// Newline-delimited JSON; one response per request, same framing as the remote protocol

use crate::registry::models::{ProjectCategory, ProjectRecord, SessionRecord};
use serde::{Deserialize, Serialize};

pub use crate::remote::protocol::{deserialize_message, serialize_message, MAX_FRAME_SIZE};

/// Bumped on any breaking change to the requests below
pub const CONTROL_PROTOCOL_VERSION: u32 = 1;

/// Request message from a local client to the daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ControlRequest {
    /// First frame on every connection
    Handshake { client_version: u32 },
    /// Ping to check if the daemon is alive
    Ping,
    /// Request the daemon to shut down gracefully
    Shutdown,

    ListProjects,
    /// Sessions of one project, or every session
    ListSessions {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
    },
    AddProject {
        name: String,
        path: String,
        #[serde(default)]
        icon: String,
        #[serde(default)]
        category: ProjectCategory,
    },
    RemoveProject { project_id: String },

    CreateSession { project_id: String, name: String },
    RenameSession { session_id: String, name: String },
    SetCompleted { session_id: String, completed: bool },
    /// `None` clears the summary
    SetSummary {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    RecordLogSaved { session_id: String, log_file: String },
    SetWaiting { session_id: String, waiting: bool },
    TouchSession { session_id: String },
    DeleteSession { session_id: String },

    /// Whether the hub app is in front; suppresses alerts while it is
    SetForeground { foreground: bool },
}

/// Error codes returned by the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlErrorCode {
    VersionMismatch,
    NotFound,
    InvalidRequest,
    /// The registry could not be persisted
    StoreFailed,
}

/// Response message from the daemon to a local client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ControlResponse {
    Handshake { protocol_version: u32 },
    Pong,
    ShuttingDown,
    Projects { projects: Vec<ProjectRecord> },
    Sessions { sessions: Vec<SessionRecord> },
    Project { project: ProjectRecord },
    Session { session: SessionRecord },
    /// The waiting flag was applied; `changed` is false for repeats
    Waiting { changed: bool },
    Ok,
    Error {
        code: ControlErrorCode,
        message: String,
    },
}

impl ControlResponse {
    pub fn error(code: ControlErrorCode, message: impl Into<String>) -> Self {
        ControlResponse::Error {
            code,
            message: message.into(),
        }
    }
}
