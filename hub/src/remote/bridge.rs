// Terminal stream bridge: delivers one session's content to a viewer
// Push channel first, with a slower pull cadence while pushes stay quiet

use crate::config::StreamSettings;
use crate::error::TransportError;
use crate::remote::clean::clean_content;
use crate::remote::connection::ConnectionState;
use crate::remote::transport::{ContentUpdate, Transport};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Timing knobs for one bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub tick_interval: Duration,
    /// Quiet ticks before the first pull
    pub fallback_threshold: u32,
    /// Counter value after a pull; sets the slower pull cadence
    pub fallback_resume_at: u32,
    /// How long the "sent" acknowledgement stays visible
    pub sent_ack: Duration,
}

impl From<&StreamSettings> for BridgeConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            tick_interval: settings.tick_interval(),
            fallback_threshold: settings.fallback_threshold,
            fallback_resume_at: settings.fallback_resume_at.min(settings.fallback_threshold),
            sent_ack: settings.sent_ack(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

/// What the viewer is told
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerEvent {
    Content { content: String, is_running: bool },
    Sent,
    SentCleared,
    /// Transient; the unsent text is handed back so it can be retried
    SendFailed { message: String, text: String },
    Connection(ConnectionState),
    SubscribeFailed(String),
    /// The host no longer knows this session
    SubscriptionLost,
}

/// Result of offering an update to the cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Deliver(String),
    /// Newer than the last update but cleans to the same text
    Unchanged,
    /// Not newer than what was already shown
    Stale,
}

/// Per-session delivery state; lives as long as the bridge
#[derive(Debug, Default)]
pub struct StreamCursor {
    last_content: Option<String>,
    last_seq: Option<u64>,
    last_delivered_at: Option<Instant>,
    quiet_ticks: u32,
}

impl StreamCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_content(&self) -> Option<&str> {
        self.last_content.as_deref()
    }

    pub fn last_delivered_at(&self) -> Option<Instant> {
        self.last_delivered_at
    }

    pub fn quiet_ticks(&self) -> u32 {
        self.quiet_ticks
    }

    /// Clean and compare an update against what was last shown
    pub fn offer(&mut self, update: &ContentUpdate) -> Delivery {
        if self.last_seq.map_or(false, |seq| update.seq <= seq) {
            return Delivery::Stale;
        }
        self.last_seq = Some(update.seq);

        let cleaned = clean_content(&update.content);
        if self.last_content.as_deref() == Some(cleaned.as_str()) {
            return Delivery::Unchanged;
        }
        self.last_content = Some(cleaned.clone());
        self.last_delivered_at = Some(Instant::now());
        Delivery::Deliver(cleaned)
    }

    /// The push channel produced something newer
    pub fn heard_push(&mut self) {
        self.quiet_ticks = 0;
    }

    /// Count a tick without pushes; true when a pull is due
    pub fn quiet_tick(&mut self, config: &BridgeConfig) -> bool {
        self.quiet_ticks += 1;
        if self.quiet_ticks >= config.fallback_threshold {
            self.quiet_ticks = config.fallback_resume_at;
            true
        } else {
            false
        }
    }
}

/// Event sender that goes silent once the bridge is closed
#[derive(Clone)]
struct Emitter {
    tx: mpsc::UnboundedSender<ViewerEvent>,
    active: Arc<AtomicBool>,
}

impl Emitter {
    fn emit(&self, event: ViewerEvent) {
        if self.active.load(Ordering::SeqCst) {
            let _ = self.tx.send(event);
        }
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct BridgeTask {
    session_id: String,
    transport: Arc<dyn Transport>,
    config: BridgeConfig,
    cursor: StreamCursor,
    emitter: Emitter,
    connection: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
}

impl BridgeTask {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let initial = *self.connection.borrow_and_update();
        self.emitter.emit(ViewerEvent::Connection(initial));
        let mut connected = initial == ConnectionState::Connected;
        if connected {
            self.subscribe().await;
        }

        let mut watching = true;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = self.connection.changed(), if watching => {
                    if changed.is_err() {
                        watching = false;
                        continue;
                    }
                    let state = *self.connection.borrow_and_update();
                    self.emitter.emit(ViewerEvent::Connection(state));
                    let now_connected = state == ConnectionState::Connected;
                    if now_connected && !connected {
                        self.subscribe().await;
                    }
                    connected = now_connected;
                }
                _ = ticker.tick() => {
                    if connected {
                        self.tick().await;
                    }
                }
            }
        }
        debug!(session_id = %self.session_id, "stream bridge stopped");
    }

    async fn subscribe(&mut self) {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.transport.subscribe(&self.session_id) => result,
        };
        match result {
            Ok(()) => debug!(session_id = %self.session_id, "subscribed"),
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "subscribe failed, relying on pulls");
                self.emitter.emit(ViewerEvent::SubscribeFailed(e.to_string()));
            }
        }
    }

    async fn tick(&mut self) {
        let push = self
            .transport
            .latest_push(&self.session_id)
            .filter(|update| !update.content.is_empty());

        if let Some(update) = push {
            match self.cursor.offer(&update) {
                Delivery::Stale => {}
                Delivery::Unchanged => {
                    self.cursor.heard_push();
                    return;
                }
                Delivery::Deliver(content) => {
                    self.cursor.heard_push();
                    self.emitter.emit(ViewerEvent::Content {
                        content,
                        is_running: update.is_running,
                    });
                    return;
                }
            }
        }

        if self.cursor.quiet_tick(&self.config) {
            self.pull().await;
        }
    }

    async fn pull(&mut self) {
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = self.transport.pull_content(&self.session_id) => result,
        };
        // Close may have won the race while the request was in flight
        if !self.emitter.is_active() {
            return;
        }

        match result {
            Ok(update) if update.content.is_empty() => {}
            Ok(update) => {
                if let Delivery::Deliver(content) = self.cursor.offer(&update) {
                    self.emitter.emit(ViewerEvent::Content {
                        content,
                        is_running: update.is_running,
                    });
                }
            }
            Err(TransportError::SubscriptionLost(_)) => {
                self.emitter.emit(ViewerEvent::SubscriptionLost);
            }
            Err(e) => debug!(session_id = %self.session_id, error = %e, "fallback pull failed"),
        }
    }
}

/// Streams one session to a viewer until closed
pub struct StreamBridge {
    session_id: String,
    transport: Arc<dyn Transport>,
    config: BridgeConfig,
    emitter: Emitter,
    connection: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    sends: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl StreamBridge {
    /// Start streaming; subscribes right away when the transport is connected
    pub fn open(
        session_id: &str,
        transport: Arc<dyn Transport>,
        connection: watch::Receiver<ConnectionState>,
        config: BridgeConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ViewerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = Emitter {
            tx,
            active: Arc::new(AtomicBool::new(true)),
        };
        let cancel = CancellationToken::new();

        let task = BridgeTask {
            session_id: session_id.to_string(),
            transport: transport.clone(),
            config,
            cursor: StreamCursor::new(),
            emitter: emitter.clone(),
            connection: connection.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        let bridge = Self {
            session_id: session_id.to_string(),
            transport,
            config,
            emitter,
            connection,
            cancel,
            sends: Arc::new(AtomicU64::new(0)),
            task: Some(handle),
        };
        (bridge, rx)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fire-and-forget text input; the outcome arrives as viewer events
    pub fn send_text(&self, text: &str) {
        let transport = self.transport.clone();
        let emitter = self.emitter.clone();
        let cancel = self.cancel.clone();
        let session_id = self.session_id.clone();
        let text = text.to_string();
        let sent_ack = self.config.sent_ack;
        let sends = self.sends.clone();
        let generation = sends.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = transport.send_text(&session_id, &text) => result,
            };
            match result {
                Ok(()) => {
                    emitter.emit(ViewerEvent::Sent);
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(sent_ack) => {}
                    }
                    // A later send owns the acknowledgement now
                    if sends.load(Ordering::SeqCst) == generation {
                        emitter.emit(ViewerEvent::SentCleared);
                    }
                }
                Err(e) => {
                    warn!(%session_id, error = %e, "send failed");
                    let message = match e {
                        TransportError::SendFailed(message) => message,
                        other => other.to_string(),
                    };
                    emitter.emit(ViewerEvent::SendFailed { message, text });
                }
            }
        });
    }

    /// Stop streaming and unsubscribe; nothing is emitted after this starts
    pub async fn close(mut self) {
        self.emitter.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        if *self.connection.borrow() == ConnectionState::Connected {
            if let Err(e) = self.transport.unsubscribe(&self.session_id).await {
                debug!(session_id = %self.session_id, error = %e, "unsubscribe failed");
            }
        }
    }
}

impl Drop for StreamBridge {
    fn drop(&mut self) {
        self.emitter.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}
