//! Scriptable TCP host speaking the viewer protocol

use claudehub_lib::remote::protocol::{
    deserialize_message, serialize_message, HostErrorCode, HostFrame, HostNotification,
    HostRequest, HostResponse, RequestFrame, PROTOCOL_VERSION,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct HostState {
    content: HashMap<String, (String, bool)>,
    subscriptions: HashSet<String>,
    sent: Vec<(String, String)>,
    handshakes: usize,
    connection: Option<(mpsc::UnboundedSender<HostFrame>, CancellationToken)>,
}

pub struct FakeHost {
    addr: String,
    token: String,
    state: Arc<Mutex<HostState>>,
    accept_task: JoinHandle<()>,
}

impl FakeHost {
    /// Listen on an ephemeral localhost port, accepting `token` only
    pub async fn start(token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(HostState::default()));

        let accept_state = state.clone();
        let expected = token.to_string();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_state.clone(), expected.clone()));
            }
        });

        Self {
            addr,
            token: token.to_string(),
            state,
            accept_task,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn set_content(&self, session_id: &str, content: &str, is_running: bool) {
        self.state
            .lock()
            .unwrap()
            .content
            .insert(session_id.to_string(), (content.to_string(), is_running));
    }

    /// Update the content and push it to a subscribed viewer
    pub fn push(&self, session_id: &str, content: &str, is_running: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        state
            .content
            .insert(session_id.to_string(), (content.to_string(), is_running));
        if !state.subscriptions.contains(session_id) {
            return false;
        }
        match &state.connection {
            Some((tx, _)) => tx
                .send(HostFrame::Notification {
                    notification: HostNotification::ContentUpdated {
                        session_id: session_id.to_string(),
                        content: content.to_string(),
                        is_running,
                    },
                })
                .is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.state.lock().unwrap().subscriptions.contains(session_id)
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn handshakes(&self) -> usize {
        self.state.lock().unwrap().handshakes
    }

    /// Close the live connection from the host side
    pub fn drop_connection(&self) {
        let mut state = self.state.lock().unwrap();
        state.subscriptions.clear();
        if let Some((_, kill)) = state.connection.take() {
            kill.cancel();
        }
    }
}

impl Drop for FakeHost {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.drop_connection();
    }
}

async fn write_frame(writer: &mut (impl AsyncWriteExt + Unpin), frame: &HostFrame) -> bool {
    let bytes = serialize_message(frame).unwrap();
    writer.write_all(&bytes).await.is_ok() && writer.flush().await.is_ok()
}

async fn serve(stream: TcpStream, state: Arc<Mutex<HostState>>, expected_token: String) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let Ok(Some(line)) = lines.next_line().await else {
        return;
    };
    let Ok(frame) = deserialize_message::<RequestFrame>(line.as_bytes()) else {
        return;
    };
    let response = match frame.request {
        HostRequest::Handshake { token, .. } if token == expected_token => {
            HostResponse::Handshake {
                protocol_version: PROTOCOL_VERSION,
            }
        }
        _ => HostResponse::Error {
            code: HostErrorCode::Unauthorized,
            message: "bad token".into(),
        },
    };
    let accepted = matches!(response, HostResponse::Handshake { .. });

    // Registered before replying so the viewer never sees an unregistered connection
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let kill = CancellationToken::new();
    if accepted {
        let mut state = state.lock().unwrap();
        state.handshakes += 1;
        state.connection = Some((out_tx, kill.clone()));
    }

    write_frame(
        &mut write_half,
        &HostFrame::Response {
            id: frame.id,
            response,
        },
    )
    .await;
    if !accepted {
        return;
    }

    loop {
        tokio::select! {
            _ = kill.cancelled() => break,
            Some(frame) = out_rx.recv() => {
                if !write_frame(&mut write_half, &frame).await {
                    break;
                }
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Ok(frame) = deserialize_message::<RequestFrame>(line.as_bytes()) else {
                    continue;
                };
                let response = handle(&state, frame.request);
                let reply = HostFrame::Response { id: frame.id, response };
                if !write_frame(&mut write_half, &reply).await {
                    break;
                }
            }
        }
    }
    let _ = write_half.shutdown().await;
}

fn handle(state: &Mutex<HostState>, request: HostRequest) -> HostResponse {
    let mut state = state.lock().unwrap();
    let unknown = |session_id: &str| HostResponse::Error {
        code: HostErrorCode::UnknownSession,
        message: format!("unknown session {}", session_id),
    };

    match request {
        HostRequest::Subscribe { session_id } => {
            if !state.content.contains_key(&session_id) {
                return unknown(&session_id);
            }
            state.subscriptions.insert(session_id.clone());
            HostResponse::Subscribed { session_id }
        }
        HostRequest::Unsubscribe { session_id } => {
            state.subscriptions.remove(&session_id);
            HostResponse::Unsubscribed { session_id }
        }
        HostRequest::PullContent { session_id } => match state.content.get(&session_id) {
            Some((content, is_running)) => HostResponse::Content {
                content: content.clone(),
                is_running: *is_running,
            },
            None => unknown(&session_id),
        },
        HostRequest::SendText { session_id, text } => {
            if !state.content.contains_key(&session_id) {
                return HostResponse::Error {
                    code: HostErrorCode::SendRejected,
                    message: "session is not running".into(),
                };
            }
            state.sent.push((session_id, text));
            HostResponse::Sent
        }
        HostRequest::Handshake { .. } => HostResponse::Error {
            code: HostErrorCode::InvalidRequest,
            message: "already handshaken".into(),
        },
    }
}
