//! Connection lifecycle for a remote transport.
//!
//! [`ConnectionMachine`] is the single source of truth for whether the
//! transport is usable. Legal edges:
//!
//! ```text
//! disconnected --connect--> connecting --succeeded--> connected
//! connecting   --failed---> disconnected
//! connected    --dropped--> reconnecting --succeeded--> connected
//! reconnecting --gave_up--> disconnected
//! any          --disconnect--> disconnected
//! ```
//!
//! Reconnect attempts back off exponentially and the delay resets to the
//! minimum whenever the machine enters `connected`.

use crate::config::ReconnectSettings;
use crate::error::{ConnectionError, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connect,
    Succeeded,
    Failed,
    Dropped,
    GaveUp,
    Disconnect,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionEvent::Connect => write!(f, "connect"),
            ConnectionEvent::Succeeded => write!(f, "succeed"),
            ConnectionEvent::Failed => write!(f, "fail"),
            ConnectionEvent::Dropped => write!(f, "drop"),
            ConnectionEvent::GaveUp => write!(f, "give up"),
            ConnectionEvent::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Transition table; `None` means the edge is illegal
pub fn next_state(state: ConnectionState, event: ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent::*;
    use ConnectionState::*;

    match (state, event) {
        (_, Disconnect) => Some(Disconnected),
        (Disconnected, Connect) => Some(Connecting),
        (Connecting, Succeeded) => Some(Connected),
        (Connecting, Failed) => Some(Disconnected),
        (Connected, Dropped) => Some(Reconnecting),
        (Reconnecting, Succeeded) => Some(Connected),
        (Reconnecting, GaveUp) => Some(Disconnected),
        _ => None,
    }
}

/// Exponential backoff bounded by a max interval
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: min,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Opens and closes the underlying connection
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> Result<(), TransportError>;
    async fn close(&self);
    /// Resolves once the current connection is gone
    async fn closed(&self);
}

pub struct ConnectionMachine {
    connector: Arc<dyn Connector>,
    max_attempts: u32,
    state: watch::Sender<ConnectionState>,
    backoff: Mutex<Backoff>,
    /// Cancelled by `disconnect`; replaced afterwards so later attempts start fresh
    attempts: Mutex<CancellationToken>,
}

impl ConnectionMachine {
    pub fn new(connector: Arc<dyn Connector>, settings: &ReconnectSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            max_attempts: settings.max_attempts,
            state,
            backoff: Mutex::new(Backoff::new(
                Duration::from_millis(settings.min_interval_ms),
                Duration::from_millis(settings.max_interval_ms),
            )),
            attempts: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn apply(&self, event: ConnectionEvent) -> Result<ConnectionState, ConnectionError> {
        let mut result = Err(ConnectionError::Cancelled);
        self.state.send_if_modified(|state| match next_state(*state, event) {
            Some(next) => {
                debug!(from = %state, to = %next, %event, "connection transition");
                let changed = *state != next;
                *state = next;
                result = Ok(next);
                changed
            }
            None => {
                result = Err(ConnectionError::IllegalTransition {
                    state: state.to_string(),
                    event: event.to_string(),
                });
                false
            }
        });

        if matches!(result, Ok(ConnectionState::Connected)) {
            self.reset_backoff();
        }
        result
    }

    fn attempt_token(&self) -> CancellationToken {
        self.attempts
            .lock()
            .map(|token| token.clone())
            .unwrap_or_default()
    }

    fn reset_backoff(&self) {
        if let Ok(mut backoff) = self.backoff.lock() {
            backoff.reset();
        }
    }

    fn next_delay(&self) -> Duration {
        self.backoff
            .lock()
            .map(|mut backoff| backoff.next_delay())
            .unwrap_or(Duration::from_secs(1))
    }

    /// Open the connection from `disconnected`
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let token = self.attempt_token();
        self.apply(ConnectionEvent::Connect)?;

        let result = tokio::select! {
            _ = token.cancelled() => return Err(ConnectionError::Cancelled),
            result = self.connector.open() => result,
        };

        match result {
            Ok(()) if token.is_cancelled() => {
                self.connector.close().await;
                Err(ConnectionError::Cancelled)
            }
            Ok(()) => {
                self.apply(ConnectionEvent::Succeeded)?;
                info!("connected");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "connect failed");
                let _ = self.apply(ConnectionEvent::Failed);
                Err(e.into())
            }
        }
    }

    /// Handle a dropped connection: enter `reconnecting` and retry with backoff
    ///
    /// Returns the state the machine settled in.
    pub async fn connection_lost(&self) -> ConnectionState {
        let token = self.attempt_token();
        if self.apply(ConnectionEvent::Dropped).is_err() {
            return self.state();
        }
        warn!("connection dropped, reconnecting");

        for attempt in 1..=self.max_attempts {
            let delay = self.next_delay();
            debug!(attempt, ?delay, "waiting before reconnect");

            tokio::select! {
                _ = token.cancelled() => return self.state(),
                _ = tokio::time::sleep(delay) => {}
            }

            let result = tokio::select! {
                _ = token.cancelled() => return self.state(),
                result = self.connector.open() => result,
            };

            match result {
                Ok(()) if token.is_cancelled() => {
                    self.connector.close().await;
                    return self.state();
                }
                Ok(()) => {
                    if self.apply(ConnectionEvent::Succeeded).is_ok() {
                        info!(attempt, "reconnected");
                    }
                    return self.state();
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        warn!(attempts = self.max_attempts, "giving up on reconnect");
        let _ = self.apply(ConnectionEvent::GaveUp);
        self.state()
    }

    /// Close from any state, cancelling in-flight attempts
    pub async fn disconnect(&self) {
        if let Ok(mut token) = self.attempts.lock() {
            token.cancel();
            *token = CancellationToken::new();
        }
        let _ = self.apply(ConnectionEvent::Disconnect);
        self.connector.close().await;
    }
}

/// Watches an open connection and drives reconnects when it drops
pub struct HostLink {
    machine: Arc<ConnectionMachine>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HostLink {
    pub fn spawn(machine: Arc<ConnectionMachine>, connector: Arc<dyn Connector>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(machine.clone(), connector, cancel.clone()));
        Self {
            machine,
            cancel,
            task: Some(task),
        }
    }

    pub fn machine(&self) -> &Arc<ConnectionMachine> {
        &self.machine
    }

    /// Stop supervising and disconnect
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.machine.disconnect().await;
    }
}

impl Drop for HostLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn supervise(
    machine: Arc<ConnectionMachine>,
    connector: Arc<dyn Connector>,
    cancel: CancellationToken,
) {
    let mut states = machine.subscribe();
    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            res = states.wait_for(|s| *s == ConnectionState::Connected) => res.is_ok(),
        };
        if !connected {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = connector.closed() => {}
        }

        // A deliberate disconnect also closes the connector
        if machine.state() == ConnectionState::Connected {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = machine.connection_lost() => {}
            }
        }
    }
    debug!("host link supervisor stopped");
}
