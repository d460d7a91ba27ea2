// Control server - serves local requests on the daemon's Unix socket
// Every registry change goes through RegistrySync so it is persisted and exported

use crate::attention::NotificationGate;
use crate::config::Config;
use crate::control::protocol::{
    deserialize_message, serialize_message, ControlErrorCode, ControlRequest, ControlResponse,
    CONTROL_PROTOCOL_VERSION, MAX_FRAME_SIZE,
};
use crate::registry::models::{ProjectRecord, SessionRecord};
use crate::registry::HubStore;
use crate::sync::service::RegistrySync;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared handles every client connection works against
pub struct ControlState {
    pub sync: Arc<RegistrySync>,
    pub gate: Arc<NotificationGate>,
    /// Signals the daemon's main loop to stop
    pub shutdown_tx: mpsc::Sender<()>,
}

/// Bind the control socket, replacing a stale one left by a crashed daemon
pub fn bind_control_socket(config: &Config) -> Result<UnixListener> {
    config
        .remove_socket()
        .with_context(|| format!("Failed to remove stale socket: {}", config.socket_path.display()))?;

    let listener = UnixListener::bind(&config.socket_path)
        .with_context(|| format!("Failed to bind socket: {}", config.socket_path.display()))?;

    // Owner-only access
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&config.socket_path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| {
                format!(
                    "Failed to set socket permissions: {}",
                    config.socket_path.display()
                )
            })?;
    }

    Ok(listener)
}

/// Accept clients until cancelled
pub async fn serve_control(
    listener: UnixListener,
    state: Arc<ControlState>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(state, stream, cancel).await {
                                debug!(error = %e, "control client ended with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "control accept failed"),
                }
            }
        }
    }
    debug!("control server stopped");
}

async fn handle_client(
    state: Arc<ControlState>,
    stream: UnixStream,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = cancel.cancelled() => break,
            read = reader.read_line(&mut line) => read?,
        };
        if read == 0 {
            break;
        }

        let response = if line.len() > MAX_FRAME_SIZE {
            ControlResponse::error(
                ControlErrorCode::InvalidRequest,
                format!(
                    "Request frame too large: {} bytes (max {})",
                    line.len(),
                    MAX_FRAME_SIZE
                ),
            )
        } else {
            match deserialize_message::<ControlRequest>(line.as_bytes()) {
                Ok(request) => handle_request(&state, request).await,
                Err(e) => ControlResponse::error(
                    ControlErrorCode::InvalidRequest,
                    format!("Failed to parse request: {}", e),
                ),
            }
        };

        let bytes = serialize_message(&response)?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }

    Ok(())
}

fn not_found(kind: &str, id: &str) -> ControlResponse {
    ControlResponse::error(ControlErrorCode::NotFound, format!("Unknown {}: {}", kind, id))
}

fn store_failed(e: anyhow::Error) -> ControlResponse {
    warn!("control request not persisted: {:#}", e);
    ControlResponse::error(ControlErrorCode::StoreFailed, format!("{:#}", e))
}

/// The session after a mutation, when the mutation found it
fn session_after(store: &HubStore, id: &str, applied: bool) -> Option<SessionRecord> {
    if applied {
        store.session(id).cloned()
    } else {
        None
    }
}

fn session_response(result: Result<Option<SessionRecord>>, id: &str) -> ControlResponse {
    match result {
        Ok(Some(session)) => ControlResponse::Session { session },
        Ok(None) => not_found("session", id),
        Err(e) => store_failed(e),
    }
}

/// Handle a single request from a client
pub async fn handle_request(state: &ControlState, request: ControlRequest) -> ControlResponse {
    let sync = &state.sync;

    match request {
        ControlRequest::Handshake { client_version } => {
            if client_version != CONTROL_PROTOCOL_VERSION {
                return ControlResponse::error(
                    ControlErrorCode::VersionMismatch,
                    format!(
                        "client speaks version {}, daemon speaks {}; restart the daemon after upgrading",
                        client_version, CONTROL_PROTOCOL_VERSION
                    ),
                );
            }
            ControlResponse::Handshake {
                protocol_version: CONTROL_PROTOCOL_VERSION,
            }
        }

        ControlRequest::Ping => ControlResponse::Pong,

        ControlRequest::Shutdown => {
            info!("shutdown requested over control socket");
            let _ = state.shutdown_tx.send(()).await;
            ControlResponse::ShuttingDown
        }

        ControlRequest::ListProjects => {
            let projects = sync.read(|store| store.projects.clone()).await;
            ControlResponse::Projects { projects }
        }

        ControlRequest::ListSessions { project_id } => {
            let sessions: Vec<SessionRecord> = sync
                .read(|store| match &project_id {
                    Some(id) => store
                        .sessions_for_project(id)
                        .into_iter()
                        .cloned()
                        .collect(),
                    None => store.sessions.clone(),
                })
                .await;
            ControlResponse::Sessions { sessions }
        }

        ControlRequest::AddProject {
            name,
            path,
            icon,
            category,
        } => {
            if name.trim().is_empty() || path.trim().is_empty() {
                return ControlResponse::error(
                    ControlErrorCode::InvalidRequest,
                    "A project needs a name and a path",
                );
            }
            let result = sync
                .mutate(|store| {
                    // Path is the identity; adding a known folder returns the existing record
                    if let Some(existing) = store.project_by_path(&path) {
                        return existing.clone();
                    }
                    let project = ProjectRecord::new(&name, &path, &icon, category);
                    store.upsert_project(project.clone());
                    project
                })
                .await;
            match result {
                Ok(project) => ControlResponse::Project { project },
                Err(e) => store_failed(e),
            }
        }

        ControlRequest::RemoveProject { project_id } => {
            match sync.mutate(|store| store.remove_project(&project_id)).await {
                Ok(Some(project)) => ControlResponse::Project { project },
                Ok(None) => not_found("project", &project_id),
                Err(e) => store_failed(e),
            }
        }

        ControlRequest::CreateSession { project_id, name } => {
            let result = sync
                .mutate(|store| {
                    store
                        .create_session(&name, &project_id)
                        .ok()
                        .and_then(|id| store.session(&id).cloned())
                })
                .await;
            match result {
                Ok(Some(session)) => ControlResponse::Session { session },
                Ok(None) => not_found("project", &project_id),
                Err(e) => store_failed(e),
            }
        }

        ControlRequest::RenameSession { session_id, name } => {
            let result = sync
                .mutate(|store| {
                    let applied = store.rename_session(&session_id, &name);
                    session_after(store, &session_id, applied)
                })
                .await;
            session_response(result, &session_id)
        }

        ControlRequest::SetCompleted {
            session_id,
            completed,
        } => {
            let result = sync
                .mutate(|store| {
                    let applied = store.set_session_completed(&session_id, completed);
                    session_after(store, &session_id, applied)
                })
                .await;
            if completed && matches!(result, Ok(Some(_))) {
                state.gate.clear(&session_id);
            }
            session_response(result, &session_id)
        }

        ControlRequest::SetSummary {
            session_id,
            summary,
        } => {
            let result = sync
                .mutate(|store| {
                    let applied = store.set_session_summary(&session_id, summary);
                    session_after(store, &session_id, applied)
                })
                .await;
            session_response(result, &session_id)
        }

        ControlRequest::RecordLogSaved {
            session_id,
            log_file,
        } => {
            let result = sync
                .mutate(|store| {
                    let applied = store.record_log_saved(&session_id, &log_file);
                    session_after(store, &session_id, applied)
                })
                .await;
            session_response(result, &session_id)
        }

        ControlRequest::SetWaiting {
            session_id,
            waiting,
        } => {
            let known = sync.read(|store| store.session(&session_id).is_some()).await;
            if !known {
                return not_found("session", &session_id);
            }
            match sync.set_waiting_for_input(&session_id, waiting).await {
                Ok(changed) => ControlResponse::Waiting { changed },
                Err(e) => store_failed(e),
            }
        }

        ControlRequest::TouchSession { session_id } => {
            let result = sync
                .mutate(|store| {
                    let applied = store.touch_session(&session_id);
                    session_after(store, &session_id, applied)
                })
                .await;
            // Looking at a session acknowledges its alert
            if matches!(result, Ok(Some(_))) {
                state.gate.clear(&session_id);
            }
            session_response(result, &session_id)
        }

        ControlRequest::DeleteSession { session_id } => {
            let result = sync.mutate(|store| store.delete_session(&session_id)).await;
            if matches!(result, Ok(Some(_))) {
                state.gate.clear(&session_id);
            }
            session_response(result, &session_id)
        }

        ControlRequest::SetForeground { foreground } => {
            state.gate.set_foreground(foreground);
            ControlResponse::Ok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::RecordingAlertSink;
    use crate::config::NotificationSettings;
    use crate::registry::models::ProjectCategory;
    use crate::sync::codec;
    use crate::sync::engine::LocalFilesystem;
    use tempfile::TempDir;

    fn control_state(temp: &TempDir) -> (ControlState, Arc<RecordingAlertSink>, mpsc::Receiver<()>) {
        std::fs::create_dir_all(temp.path().join("sync")).unwrap();
        let sync = Arc::new(RegistrySync::new(
            HubStore::default(),
            temp.path().join("store.json"),
            temp.path().join("sync").join("projects-sync.json"),
            Arc::new(LocalFilesystem),
        ));
        let sink = Arc::new(RecordingAlertSink::new());
        let gate = Arc::new(NotificationGate::new(
            NotificationSettings::default(),
            sink.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            ControlState {
                sync,
                gate,
                shutdown_tx,
            },
            sink,
            shutdown_rx,
        )
    }

    async fn add_project(state: &ControlState, path: &str) -> ProjectRecord {
        let response = handle_request(
            state,
            ControlRequest::AddProject {
                name: "Acme".into(),
                path: path.into(),
                icon: String::new(),
                category: ProjectCategory::Client,
            },
        )
        .await;
        match response {
            ControlResponse::Project { project } => project,
            other => panic!("Expected project, got {:?}", other),
        }
    }

    async fn create_session(state: &ControlState, project_id: &str) -> SessionRecord {
        let response = handle_request(
            state,
            ControlRequest::CreateSession {
                project_id: project_id.into(),
                name: "Checkout flow".into(),
            },
        )
        .await;
        match response {
            ControlResponse::Session { session } => session,
            other => panic!("Expected session, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_version_check() {
        let temp = TempDir::new().unwrap();
        let (state, _, _rx) = control_state(&temp);

        let ok = handle_request(
            &state,
            ControlRequest::Handshake {
                client_version: CONTROL_PROTOCOL_VERSION,
            },
        )
        .await;
        assert!(matches!(ok, ControlResponse::Handshake { .. }));

        let mismatch = handle_request(
            &state,
            ControlRequest::Handshake {
                client_version: CONTROL_PROTOCOL_VERSION + 1,
            },
        )
        .await;
        assert!(matches!(
            mismatch,
            ControlResponse::Error {
                code: ControlErrorCode::VersionMismatch,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_add_project_persists_and_exports() {
        let temp = TempDir::new().unwrap();
        let (state, _, _rx) = control_state(&temp);

        let project = add_project(&state, "/work/acme").await;
        assert_eq!(project.category, ProjectCategory::Client);

        // Same folder again returns the existing record
        let again = add_project(&state, "/work/acme").await;
        assert_eq!(again.id, project.id);

        let on_disk = HubStore::load(&temp.path().join("store.json")).unwrap();
        assert_eq!(on_disk.projects.len(), 1);

        let bytes = std::fs::read(state.sync.snapshot_path()).unwrap();
        let snapshot = codec::decode(&bytes).unwrap();
        assert_eq!(snapshot.projects.len(), 1);
        assert_eq!(snapshot.projects[0].id, project.id);
    }

    #[tokio::test]
    async fn test_session_mutations() {
        let temp = TempDir::new().unwrap();
        let (state, _, _rx) = control_state(&temp);
        let project = add_project(&state, "/work/acme").await;
        let session = create_session(&state, &project.id).await;

        let renamed = handle_request(
            &state,
            ControlRequest::RenameSession {
                session_id: session.id.clone(),
                name: "Payments".into(),
            },
        )
        .await;
        assert!(matches!(renamed, ControlResponse::Session { ref session } if session.name == "Payments"));

        let completed = handle_request(
            &state,
            ControlRequest::SetCompleted {
                session_id: session.id.clone(),
                completed: true,
            },
        )
        .await;
        match completed {
            ControlResponse::Session { session } => {
                assert!(session.is_completed);
                assert!(session.completed_at.is_some());
            }
            other => panic!("Expected session, got {:?}", other),
        }

        let logged = handle_request(
            &state,
            ControlRequest::RecordLogSaved {
                session_id: session.id.clone(),
                log_file: "/logs/payments.md".into(),
            },
        )
        .await;
        assert!(matches!(logged, ControlResponse::Session { ref session } if session.last_log_saved_at.is_some()));

        let deleted = handle_request(
            &state,
            ControlRequest::DeleteSession {
                session_id: session.id.clone(),
            },
        )
        .await;
        assert!(matches!(deleted, ControlResponse::Session { .. }));

        let on_disk = HubStore::load(&temp.path().join("store.json")).unwrap();
        assert!(on_disk.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_ids_are_not_found() {
        let temp = TempDir::new().unwrap();
        let (state, _, _rx) = control_state(&temp);

        for request in [
            ControlRequest::CreateSession {
                project_id: "nope".into(),
                name: "x".into(),
            },
            ControlRequest::TouchSession {
                session_id: "nope".into(),
            },
            ControlRequest::SetWaiting {
                session_id: "nope".into(),
                waiting: true,
            },
            ControlRequest::RemoveProject {
                project_id: "nope".into(),
            },
        ] {
            let response = handle_request(&state, request).await;
            assert!(
                matches!(
                    response,
                    ControlResponse::Error {
                        code: ControlErrorCode::NotFound,
                        ..
                    }
                ),
                "got {:?}",
                response
            );
        }
    }

    #[tokio::test]
    async fn test_touch_acknowledges_alert() {
        let temp = TempDir::new().unwrap();
        let (state, sink, _rx) = control_state(&temp);
        let project = add_project(&state, "/work/acme").await;
        let session = create_session(&state, &project.id).await;

        assert!(state.gate.notify(&session.id, &session.name));
        assert!(!state.gate.notify(&session.id, &session.name));

        handle_request(
            &state,
            ControlRequest::TouchSession {
                session_id: session.id.clone(),
            },
        )
        .await;
        assert!(state.gate.notify(&session.id, &session.name));
        assert_eq!(sink.alerts().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_signals_main_loop() {
        let temp = TempDir::new().unwrap();
        let (state, _, mut rx) = control_state(&temp);

        let response = handle_request(&state, ControlRequest::Shutdown).await;
        assert_eq!(response, ControlResponse::ShuttingDown);
        assert_eq!(rx.recv().await, Some(()));
    }
}
