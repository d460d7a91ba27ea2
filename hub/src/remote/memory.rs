//! In-process transport with scriptable host behavior.
//!
//! Pushes only reach sessions that are currently subscribed, like a real
//! host. Every call is counted so tests can assert on traffic.

use crate::error::TransportError;
use crate::remote::connection::Connector;
use crate::remote::transport::{ContentUpdate, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

#[derive(Default)]
struct HostState {
    available: bool,
    subscriptions: HashSet<String>,
    pushes: HashMap<String, ContentUpdate>,
    content: HashMap<String, (String, bool)>,
    sent: Vec<(String, String)>,
    send_failure: Option<String>,
    pull_delay: Option<Duration>,
    subscribe_calls: usize,
    unsubscribe_calls: usize,
    pull_calls: usize,
}

pub struct MemoryTransport {
    host: Mutex<HostState>,
    alive: watch::Sender<bool>,
    seq: AtomicU64,
    opens: AtomicUsize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// A reachable host with no sessions; not yet connected
    pub fn new() -> Self {
        let (alive, _) = watch::channel(false);
        Self {
            host: Mutex::new(HostState {
                available: true,
                ..HostState::default()
            }),
            alive,
            seq: AtomicU64::new(0),
            opens: AtomicUsize::new(0),
        }
    }

    fn host(&self) -> MutexGuard<'_, HostState> {
        self.host.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ensure_alive(&self) -> Result<(), TransportError> {
        if *self.alive.borrow() {
            Ok(())
        } else {
            Err(TransportError::Unavailable("not connected".into()))
        }
    }

    /// Whether `open` succeeds; going unavailable also fails requests
    pub fn set_available(&self, available: bool) {
        self.host().available = available;
        if !available {
            self.alive.send_replace(false);
        }
    }

    /// Simulate the connection dropping while the host stays reachable
    pub fn drop_connection(&self) {
        self.alive.send_replace(false);
    }

    /// Push new content; ignored unless the session is subscribed
    pub fn push(&self, session_id: &str, content: &str, is_running: bool) {
        let seq = self.next_seq();
        let mut host = self.host();
        if host.subscriptions.contains(session_id) {
            host.pushes.insert(
                session_id.to_string(),
                ContentUpdate {
                    content: content.to_string(),
                    is_running,
                    seq,
                },
            );
        }
    }

    /// Content returned by `pull_content`
    pub fn set_content(&self, session_id: &str, content: &str, is_running: bool) {
        self.host()
            .content
            .insert(session_id.to_string(), (content.to_string(), is_running));
    }

    /// Make every `send_text` fail with this message, or succeed again with `None`
    pub fn fail_sends(&self, message: Option<&str>) {
        self.host().send_failure = message.map(str::to_string);
    }

    /// Keep every `pull_content` in flight this long before it answers
    pub fn delay_pulls(&self, delay: Option<Duration>) {
        self.host().pull_delay = delay;
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.host().subscribe_calls
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.host().unsubscribe_calls
    }

    pub fn pull_count(&self) -> usize {
        self.host().pull_calls
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.host().subscriptions.contains(session_id)
    }

    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.host().sent.clone()
    }
}

#[async_trait]
impl Connector for MemoryTransport {
    async fn open(&self) -> Result<(), TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let mut host = self.host();
        if !host.available {
            return Err(TransportError::Unavailable("host unreachable".into()));
        }
        // A new connection starts without subscriptions
        host.subscriptions.clear();
        host.pushes.clear();
        self.alive.send_replace(true);
        Ok(())
    }

    async fn close(&self) {
        self.alive.send_replace(false);
    }

    async fn closed(&self) {
        let mut alive = self.alive.subscribe();
        let _ = alive.wait_for(|alive| !*alive).await;
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, session_id: &str) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let mut host = self.host();
        host.subscribe_calls += 1;
        host.subscriptions.insert(session_id.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, session_id: &str) -> Result<(), TransportError> {
        self.ensure_alive()?;
        let mut host = self.host();
        host.unsubscribe_calls += 1;
        host.subscriptions.remove(session_id);
        host.pushes.remove(session_id);
        Ok(())
    }

    async fn pull_content(&self, session_id: &str) -> Result<ContentUpdate, TransportError> {
        self.ensure_alive()?;
        let delay = {
            let mut host = self.host();
            host.pull_calls += 1;
            host.pull_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let seq = self.next_seq();
        let host = self.host();
        match host.content.get(session_id) {
            Some((content, is_running)) => Ok(ContentUpdate {
                content: content.clone(),
                is_running: *is_running,
                seq,
            }),
            None => Err(TransportError::SubscriptionLost(session_id.to_string())),
        }
    }

    async fn send_text(&self, session_id: &str, text: &str) -> Result<(), TransportError> {
        self.ensure_alive()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        let mut host = self.host();
        if let Some(message) = &host.send_failure {
            return Err(TransportError::SendFailed(message.clone()));
        }
        host.sent.push((session_id.to_string(), text.to_string()));
        Ok(())
    }

    fn latest_push(&self, session_id: &str) -> Option<ContentUpdate> {
        self.host().pushes.get(session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pushes_require_subscription() {
        let transport = MemoryTransport::new();
        transport.open().await.unwrap();

        transport.push("s1", "ignored", true);
        assert!(transport.latest_push("s1").is_none());

        transport.subscribe("s1").await.unwrap();
        transport.push("s1", "hello", true);
        assert_eq!(transport.latest_push("s1").unwrap().content, "hello");

        transport.unsubscribe("s1").await.unwrap();
        assert!(transport.latest_push("s1").is_none());
    }

    #[tokio::test]
    async fn test_requests_fail_while_disconnected() {
        let transport = MemoryTransport::new();
        assert!(transport.subscribe("s1").await.is_err());

        transport.set_available(false);
        assert!(transport.open().await.is_err());
        assert_eq!(transport.open_count(), 1);
    }
}
