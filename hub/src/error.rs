//! Error taxonomy shared by the sync and remote layers.
//!
//! Registry sync and migration failures are logged and degrade to "skip this
//! cycle"; transport failures drive the connection state machine. Nothing
//! here is meant to crash the process.

use thiserror::Error;

/// Failures while reading, decoding or writing the shared snapshot
#[derive(Debug, Error)]
pub enum SyncError {
    /// Payload is malformed, truncated or missing required fields
    #[error("snapshot is corrupt: {0}")]
    SnapshotCorrupt(String),
    /// Payload was written by a newer build with a breaking format change
    #[error("snapshot version {found} is newer than supported version {supported}")]
    SnapshotVersionUnsupported { found: u32, supported: u32 },
    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by a remote transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No usable connection to the host
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    /// The host no longer streams this session
    #[error("subscription lost for session {0}")]
    SubscriptionLost(String),
    /// Sending text into the running session failed
    #[error("send failed: {0}")]
    SendFailed(String),
    /// The host answered with something we did not expect
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// True when the failure means the connection itself is gone
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

/// Failures reported by the connection state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The requested event has no edge from the current state
    #[error("cannot {event} while {state}")]
    IllegalTransition { state: String, event: String },
    /// A disconnect pre-empted the attempt
    #[error("connection attempt cancelled")]
    Cancelled,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
