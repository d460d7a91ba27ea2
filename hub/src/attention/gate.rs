//! At-most-once "waiting for input" alerts per session.
//!
//! A session is alerted once when it starts waiting and not again until its
//! entry is cleared (it stopped waiting, or the user looked at it).

use crate::attention::notify::{Alert, AlertSink};
use crate::config::NotificationSettings;
use crate::sync::service::RegistryEvent;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct NotificationGate {
    settings: RwLock<NotificationSettings>,
    notified: Mutex<HashSet<String>>,
    foreground: AtomicBool,
    sink: Arc<dyn AlertSink>,
}

impl NotificationGate {
    pub fn new(settings: NotificationSettings, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            settings: RwLock::new(settings),
            notified: Mutex::new(HashSet::new()),
            foreground: AtomicBool::new(false),
            sink,
        }
    }

    /// Alert for a waiting session unless suppressed; true when an alert fired
    pub fn notify(&self, session_id: &str, session_name: &str) -> bool {
        let settings = self
            .settings
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        if !settings.enabled {
            return false;
        }
        if settings.background_only && self.foreground.load(Ordering::SeqCst) {
            debug!(session_id, "app in foreground, alert suppressed");
            return false;
        }

        let first = match self.notified.lock() {
            Ok(mut notified) => notified.insert(session_id.to_string()),
            Err(_) => false,
        };
        if !first {
            return false;
        }

        self.sink.alert(&Alert {
            session_id: session_id.to_string(),
            session_name: session_name.to_string(),
        });
        true
    }

    pub fn clear(&self, session_id: &str) {
        if let Ok(mut notified) = self.notified.lock() {
            notified.remove(session_id);
        }
    }

    pub fn clear_all(&self) {
        if let Ok(mut notified) = self.notified.lock() {
            notified.clear();
        }
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }

    pub fn update_settings(&self, settings: NotificationSettings) {
        if let Ok(mut current) = self.settings.write() {
            *current = settings;
        }
    }
}

/// Turn registry waiting-flag changes into alerts until cancelled
pub async fn forward_waiting_events(
    mut events: broadcast::Receiver<RegistryEvent>,
    gate: Arc<NotificationGate>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(RegistryEvent::WaitingChanged {
                session_id,
                session_name,
                waiting: true,
            }) => {
                gate.notify(&session_id, &session_name);
            }
            Ok(RegistryEvent::WaitingChanged {
                session_id,
                waiting: false,
                ..
            }) => gate.clear(&session_id),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "alert forwarder fell behind registry events");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
