// ClaudeHub core library (shared between the host daemon and the remote viewer)

// Waiting-for-input alert gate and terminal notifications
pub mod attention;

// Paths, settings.json and PID file helpers
pub mod config;

// Daemon control socket: request types, server and blocking client
pub mod control;

// Error taxonomy for sync and remote layers
pub mod error;

// Project/session registry, legacy migration and dedup
pub mod registry;

// Remote transport, connection state machine and stream bridge
pub mod remote;

// Shared snapshot codec, reconciliation and watcher
pub mod sync;
