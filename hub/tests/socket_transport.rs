//! SocketTransport against a scripted TCP host
//!
//! Covers the handshake, request/response correlation, pushes interleaved
//! with responses, and what a viewer sees when the host drops it.

mod helpers;

use claudehub_lib::config::ReconnectSettings;
use claudehub_lib::error::TransportError;
use claudehub_lib::remote::transport::StaticToken;
use claudehub_lib::remote::{
    BridgeConfig, ConnectionMachine, ConnectionState, Connector, HostLink, SocketTransport,
    StreamBridge, Transport, ViewerEvent,
};
use helpers::fake_host::FakeHost;
use helpers::{assert_eventually, assert_eventually_bool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(5);

fn transport(host: &FakeHost, token: &str) -> Arc<SocketTransport> {
    Arc::new(SocketTransport::new(
        host.addr(),
        Arc::new(StaticToken(token.to_string())),
        Duration::from_secs(2),
    ))
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<ViewerEvent>) -> ViewerEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for viewer event")
        .expect("viewer event channel closed")
}

/// Skip events until one matches
async fn wait_for_event(
    events: &mut mpsc::UnboundedReceiver<ViewerEvent>,
    pred: impl Fn(&ViewerEvent) -> bool,
) -> ViewerEvent {
    loop {
        let event = next_event(events).await;
        if pred(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn test_handshake_then_requests() {
    let host = FakeHost::start("secret").await;
    host.set_content("s1", "hello\n", true);
    let t = transport(&host, host.token());

    t.open().await.unwrap();
    assert!(t.is_alive());
    assert_eq!(host.handshakes(), 1);

    let update = t.pull_content("s1").await.unwrap();
    assert_eq!(update.content, "hello\n");
    assert!(update.is_running);

    t.send_text("s1", "ls\n").await.unwrap();
    assert_eq!(host.sent(), vec![("s1".to_string(), "ls\n".to_string())]);

    assert!(matches!(
        t.pull_content("missing").await,
        Err(TransportError::SubscriptionLost(_))
    ));
    assert!(matches!(
        t.send_text("missing", "x").await,
        Err(TransportError::SendFailed(_))
    ));
}

#[tokio::test]
async fn test_rejected_token_fails_open() {
    let host = FakeHost::start("secret").await;
    let t = transport(&host, "wrong");

    let err = t.open().await.unwrap_err();
    assert!(matches!(err, TransportError::Unavailable(_)), "got {:?}", err);
    assert!(!t.is_alive());
    assert_eq!(host.handshakes(), 0);
}

#[tokio::test]
async fn test_pushes_reach_subscribed_session() {
    let host = FakeHost::start("secret").await;
    host.set_content("s1", "", true);
    let t = transport(&host, host.token());
    t.open().await.unwrap();

    assert!(t.latest_push("s1").is_none());
    t.subscribe("s1").await.unwrap();
    assert!(host.is_subscribed("s1"));

    assert!(host.push("s1", "frame 1", true));
    let first = assert_eventually("first push", WAIT, Duration::from_millis(10), || async {
        t.latest_push("s1")
            .filter(|u| u.content == "frame 1")
            .ok_or("no push yet")
    })
    .await;

    assert!(host.push("s1", "frame 2", false));
    let second = assert_eventually("second push", WAIT, Duration::from_millis(10), || async {
        t.latest_push("s1")
            .filter(|u| u.content == "frame 2")
            .ok_or("still on first push")
    })
    .await;
    assert!(second.seq > first.seq);
    assert!(!second.is_running);

    t.unsubscribe("s1").await.unwrap();
    assert!(t.latest_push("s1").is_none());
    assert!(!host.is_subscribed("s1"));
}

#[tokio::test]
async fn test_subscribe_unknown_session_is_lost() {
    let host = FakeHost::start("secret").await;
    let t = transport(&host, host.token());
    t.open().await.unwrap();

    assert!(matches!(
        t.subscribe("nope").await,
        Err(TransportError::SubscriptionLost(id)) if id == "nope"
    ));
}

#[tokio::test]
async fn test_host_drop_resolves_closed() {
    let host = FakeHost::start("secret").await;
    host.set_content("s1", "x", true);
    let t = transport(&host, host.token());
    t.open().await.unwrap();

    host.drop_connection();
    tokio::time::timeout(WAIT, t.closed())
        .await
        .expect("closed() never resolved");
    assert!(!t.is_alive());
    assert!(t.pull_content("s1").await.is_err());
}

#[tokio::test]
async fn test_viewer_streams_and_recovers_from_drop() {
    let host = FakeHost::start("secret").await;
    host.set_content("s1", "", true);
    let t = transport(&host, host.token());

    let machine = Arc::new(ConnectionMachine::new(
        t.clone(),
        &ReconnectSettings {
            min_interval_ms: 100,
            max_interval_ms: 200,
            max_attempts: 10,
        },
    ));
    machine.connect().await.unwrap();
    let link = HostLink::spawn(machine.clone(), t.clone());

    let config = BridgeConfig {
        tick_interval: Duration::from_millis(20),
        ..BridgeConfig::default()
    };
    let (bridge, mut events) = StreamBridge::open("s1", t.clone(), machine.subscribe(), config);
    assert_eq!(
        next_event(&mut events).await,
        ViewerEvent::Connection(ConnectionState::Connected)
    );

    assert_eventually_bool("viewer subscribed", WAIT, || async { host.is_subscribed("s1") }).await;
    host.push("s1", "\x1b[32m$ cargo test\x1b[0m   \n\n", true);
    let event = wait_for_event(&mut events, |e| matches!(e, ViewerEvent::Content { .. })).await;
    assert_eq!(
        event,
        ViewerEvent::Content {
            content: "$ cargo test".to_string(),
            is_running: true,
        }
    );

    bridge.send_text("y\n");
    wait_for_event(&mut events, |e| *e == ViewerEvent::Sent).await;
    assert_eq!(host.sent(), vec![("s1".to_string(), "y\n".to_string())]);

    host.drop_connection();
    wait_for_event(&mut events, |e| {
        *e == ViewerEvent::Connection(ConnectionState::Reconnecting)
    })
    .await;
    wait_for_event(&mut events, |e| {
        *e == ViewerEvent::Connection(ConnectionState::Connected)
    })
    .await;
    assert_eq!(host.handshakes(), 2);

    assert_eventually_bool("viewer re-subscribed", WAIT, || async { host.is_subscribed("s1") })
        .await;
    host.push("s1", "after reconnect", true);
    let event = wait_for_event(&mut events, |e| matches!(e, ViewerEvent::Content { .. })).await;
    assert_eq!(
        event,
        ViewerEvent::Content {
            content: "after reconnect".to_string(),
            is_running: true,
        }
    );

    bridge.close().await;
    link.shutdown().await;
    assert_eq!(machine.state(), ConnectionState::Disconnected);
}
