// Transport seam between the stream bridge and a host
// SocketTransport speaks the newline-delimited JSON protocol over TCP

use crate::error::TransportError;
use crate::remote::connection::Connector;
use crate::remote::protocol::{
    deserialize_message, serialize_message, HostErrorCode, HostFrame, HostNotification,
    HostRequest, HostResponse, RequestFrame, MAX_FRAME_SIZE, PROTOCOL_VERSION,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One observation of a session's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentUpdate {
    pub content: String,
    pub is_running: bool,
    /// Receive order stamped by the transport; larger is newer
    pub seq: u64,
}

/// Operations the stream bridge needs from a host connection
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, session_id: &str) -> Result<(), TransportError>;
    async fn unsubscribe(&self, session_id: &str) -> Result<(), TransportError>;
    async fn pull_content(&self, session_id: &str) -> Result<ContentUpdate, TransportError>;
    async fn send_text(&self, session_id: &str, text: &str) -> Result<(), TransportError>;
    /// Most recent pushed update for a subscribed session
    fn latest_push(&self, session_id: &str) -> Option<ContentUpdate>;
}

/// Accessor for a currently valid auth token; issuance happens elsewhere
pub trait TokenSource: Send + Sync {
    fn valid_token(&self) -> Option<String>;
}

/// Reads the token from an environment variable on every connect
#[derive(Debug, Clone)]
pub struct EnvTokenSource {
    var: String,
}

impl EnvTokenSource {
    pub const DEFAULT_VAR: &'static str = "CLAUDEHUB_TOKEN";

    pub fn new(var: &str) -> Self {
        Self {
            var: var.to_string(),
        }
    }
}

impl Default for EnvTokenSource {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VAR)
    }
}

impl TokenSource for EnvTokenSource {
    fn valid_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.trim().is_empty())
    }
}

/// A fixed token
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl TokenSource for StaticToken {
    fn valid_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// State shared with the reader task
struct Shared {
    pending: Mutex<HashMap<u64, oneshot::Sender<HostResponse>>>,
    pushes: Mutex<HashMap<String, ContentUpdate>>,
    seq: AtomicU64,
    alive: watch::Sender<bool>,
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn mark_dead(&self) {
        self.alive.send_replace(false);
        // Dropping the senders fails every in-flight request
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }

    fn dispatch(&self, frame: HostFrame) {
        match frame {
            HostFrame::Response { id, response } => {
                let sender = self.pending.lock().ok().and_then(|mut p| p.remove(&id));
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id, "response for unknown or expired request"),
                }
            }
            HostFrame::Notification {
                notification:
                    HostNotification::ContentUpdated {
                        session_id,
                        content,
                        is_running,
                    },
            } => {
                let update = ContentUpdate {
                    content,
                    is_running,
                    seq: self.next_seq(),
                };
                if let Ok(mut pushes) = self.pushes.lock() {
                    pushes.insert(session_id, update);
                }
            }
            HostFrame::Notification {
                notification: HostNotification::SessionEnded { session_id },
            } => {
                info!(%session_id, "host ended session stream");
                if let Ok(mut pushes) = self.pushes.lock() {
                    pushes.remove(&session_id);
                }
            }
        }
    }
}

/// TCP connection to a host
pub struct SocketTransport {
    addr: String,
    tokens: Arc<dyn TokenSource>,
    request_timeout: Duration,
    shared: Arc<Shared>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl SocketTransport {
    pub fn new(addr: &str, tokens: Arc<dyn TokenSource>, request_timeout: Duration) -> Self {
        let (alive, _) = watch::channel(false);
        Self {
            addr: addr.to_string(),
            tokens,
            request_timeout,
            shared: Arc::new(Shared {
                pending: Mutex::new(HashMap::new()),
                pushes: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
                alive,
            }),
            writer: tokio::sync::Mutex::new(None),
            reader_task: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_alive(&self) -> bool {
        *self.shared.alive.borrow()
    }

    async fn handshake(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
    ) -> Result<(), TransportError> {
        let token = self
            .tokens
            .valid_token()
            .ok_or_else(|| TransportError::Unavailable("no valid token".into()))?;

        let frame = RequestFrame {
            id: 0,
            request: HostRequest::Handshake {
                client_version: PROTOCOL_VERSION,
                token,
            },
        };
        let bytes = serialize_message(&frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        writer
            .write_all(&bytes)
            .await
            .map_err(|e| TransportError::Unavailable(format!("failed to send handshake: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::Unavailable(format!("failed to flush handshake: {}", e)))?;

        let mut line = Vec::new();
        let read = tokio::time::timeout(self.request_timeout, read_frame(reader, &mut line))
            .await
            .map_err(|_| TransportError::Unavailable("handshake timed out".into()))?
            .map_err(|e| TransportError::Unavailable(format!("handshake failed: {}", e)))?;
        if !read {
            return Err(TransportError::Unavailable(
                "host closed connection during handshake".into(),
            ));
        }

        match deserialize_message::<HostFrame>(&line) {
            Ok(HostFrame::Response {
                response: HostResponse::Handshake { protocol_version },
                ..
            }) => {
                debug!(protocol_version, "handshake complete");
                Ok(())
            }
            Ok(HostFrame::Response {
                response: HostResponse::Error { code, message },
                ..
            }) => match code {
                HostErrorCode::VersionMismatch => Err(TransportError::Protocol(format!(
                    "protocol version mismatch: {}",
                    message
                ))),
                _ => Err(TransportError::Unavailable(message)),
            },
            Ok(other) => Err(TransportError::Protocol(format!(
                "expected handshake response, got: {:?}",
                other
            ))),
            Err(e) => Err(TransportError::Protocol(e.to_string())),
        }
    }

    async fn request(&self, request: HostRequest) -> Result<HostResponse, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let bytes = serialize_message(&RequestFrame { id, request })
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.insert(id, tx);
        }

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.as_mut() {
                Some(w) => match w.write_all(&bytes).await {
                    Ok(()) => w.flush().await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                },
                None => Err("not connected".to_string()),
            }
        };
        if let Err(e) = written {
            self.forget(id);
            return Err(TransportError::Unavailable(e));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(TransportError::Unavailable("connection closed".into())),
            Err(_) => {
                self.forget(id);
                Err(TransportError::Unavailable(format!(
                    "request {} timed out after {:?}",
                    id, self.request_timeout
                )))
            }
        }
    }

    fn forget(&self, id: u64) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            pending.remove(&id);
        }
    }
}

fn unexpected(response: HostResponse) -> TransportError {
    TransportError::Protocol(format!("unexpected response: {:?}", response))
}

/// Read one newline-terminated frame; returns false on EOF
async fn read_frame(
    reader: &mut BufReader<OwnedReadHalf>,
    buf: &mut Vec<u8>,
) -> std::io::Result<bool> {
    buf.clear();
    let n = reader.read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(false);
    }
    if buf.len() > MAX_FRAME_SIZE + 1 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", buf.len()),
        ));
    }
    Ok(true)
}

async fn read_loop(mut reader: BufReader<OwnedReadHalf>, shared: Arc<Shared>) {
    let mut line = Vec::new();
    loop {
        match read_frame(&mut reader, &mut line).await {
            Ok(true) => match deserialize_message::<HostFrame>(&line) {
                Ok(frame) => shared.dispatch(frame),
                Err(e) => warn!("Ignoring malformed frame from host: {}", e),
            },
            Ok(false) => {
                info!("host closed connection");
                break;
            }
            Err(e) => {
                warn!("connection read failed: {}", e);
                break;
            }
        }
    }
    shared.mark_dead();
}

#[async_trait]
impl Connector for SocketTransport {
    async fn open(&self) -> Result<(), TransportError> {
        self.close().await;

        let stream = tokio::time::timeout(self.request_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Unavailable(format!("connect to {} timed out", self.addr)))?
            .map_err(|e| TransportError::Unavailable(format!("connect to {}: {}", self.addr, e)))?;
        let _ = stream.set_nodelay(true);

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        self.handshake(&mut reader, &mut write_half).await?;

        *self.writer.lock().await = Some(write_half);
        self.shared.alive.send_replace(true);
        let task = tokio::spawn(read_loop(reader, self.shared.clone()));
        if let Ok(mut slot) = self.reader_task.lock() {
            *slot = Some(task);
        }

        info!(addr = %self.addr, "connected to host");
        Ok(())
    }

    async fn close(&self) {
        let task = self.reader_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.shared.mark_dead();
        if let Ok(mut pushes) = self.shared.pushes.lock() {
            pushes.clear();
        }
    }

    async fn closed(&self) {
        let mut alive = self.shared.alive.subscribe();
        let _ = alive.wait_for(|alive| !*alive).await;
    }
}

#[async_trait]
impl Transport for SocketTransport {
    async fn subscribe(&self, session_id: &str) -> Result<(), TransportError> {
        let response = self
            .request(HostRequest::Subscribe {
                session_id: session_id.to_string(),
            })
            .await?;
        match response {
            HostResponse::Subscribed { .. } => Ok(()),
            HostResponse::Error {
                code: HostErrorCode::UnknownSession,
                ..
            } => Err(TransportError::SubscriptionLost(session_id.to_string())),
            HostResponse::Error { message, .. } => Err(TransportError::Protocol(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn unsubscribe(&self, session_id: &str) -> Result<(), TransportError> {
        if let Ok(mut pushes) = self.shared.pushes.lock() {
            pushes.remove(session_id);
        }
        let response = self
            .request(HostRequest::Unsubscribe {
                session_id: session_id.to_string(),
            })
            .await?;
        match response {
            HostResponse::Unsubscribed { .. } => Ok(()),
            HostResponse::Error { message, .. } => Err(TransportError::Protocol(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn pull_content(&self, session_id: &str) -> Result<ContentUpdate, TransportError> {
        let response = self
            .request(HostRequest::PullContent {
                session_id: session_id.to_string(),
            })
            .await?;
        match response {
            HostResponse::Content {
                content,
                is_running,
            } => Ok(ContentUpdate {
                content,
                is_running,
                seq: self.shared.next_seq(),
            }),
            HostResponse::Error {
                code: HostErrorCode::UnknownSession,
                ..
            } => Err(TransportError::SubscriptionLost(session_id.to_string())),
            HostResponse::Error { message, .. } => Err(TransportError::Protocol(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn send_text(&self, session_id: &str, text: &str) -> Result<(), TransportError> {
        let response = self
            .request(HostRequest::SendText {
                session_id: session_id.to_string(),
                text: text.to_string(),
            })
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        match response {
            HostResponse::Sent => Ok(()),
            HostResponse::Error { message, .. } => Err(TransportError::SendFailed(message)),
            other => Err(TransportError::SendFailed(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }

    fn latest_push(&self, session_id: &str) -> Option<ContentUpdate> {
        self.shared
            .pushes
            .lock()
            .ok()
            .and_then(|pushes| pushes.get(session_id).cloned())
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.reader_task.lock() {
            if let Some(task) = slot.take() {
                task.abort();
            }
        }
    }
}
