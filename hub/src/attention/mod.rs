// Waiting-for-input alerts
// Gate decides whether to alert, notify decides how

pub mod gate;
pub mod notify;

pub use gate::NotificationGate;
pub use notify::{Alert, AlertSink, RecordingAlertSink, TerminalAlertSink};
