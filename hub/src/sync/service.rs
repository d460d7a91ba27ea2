// Registry sync service: owns the host registry and mirrors it to the shared snapshot
// Imports, exports and local mutations are serialized through one async gate

use crate::error::SyncError;
use crate::registry::models::SessionId;
use crate::registry::store::{atomic_write, HubStore};
use crate::sync::codec;
use crate::sync::engine::{apply_snapshot, build_snapshot, ImportOutcome, PathProbe};
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Temp files older than this are leftovers from interrupted exports
pub const STALE_TEMP_AGE: Duration = Duration::from_secs(60 * 60);

const EVENT_CAPACITY: usize = 64;

/// Published after every registry change
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    Imported(ImportOutcome),
    Exported { fingerprint: String },
    Mutated,
    WaitingChanged {
        session_id: SessionId,
        session_name: String,
        waiting: bool,
    },
}

#[derive(Default)]
struct SyncState {
    /// Fingerprint of the last snapshot this host wrote
    last_exported: Option<String>,
}

pub struct RegistrySync {
    store: RwLock<HubStore>,
    gate: Mutex<SyncState>,
    store_path: PathBuf,
    snapshot_path: PathBuf,
    probe: Arc<dyn PathProbe>,
    events: broadcast::Sender<RegistryEvent>,
}

impl RegistrySync {
    pub fn new(
        store: HubStore,
        store_path: PathBuf,
        snapshot_path: PathBuf,
        probe: Arc<dyn PathProbe>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: RwLock::new(store),
            gate: Mutex::new(SyncState::default()),
            store_path,
            snapshot_path,
            probe,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Run a read-only query against the registry
    pub async fn read<R>(&self, f: impl FnOnce(&HubStore) -> R) -> R {
        let store = self.store.read().await;
        f(&store)
    }

    /// Import the shared snapshot; failures are logged and the cycle is skipped
    pub async fn import(&self) -> Option<ImportOutcome> {
        match self.try_import().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(path = %self.snapshot_path.display(), error = %e, "snapshot import skipped");
                None
            }
        }
    }

    /// Import the shared snapshot, reporting why a cycle was skipped
    ///
    /// Returns `Ok(None)` when there is nothing to import: no snapshot file yet,
    /// or the file is the one this host just wrote.
    pub async fn try_import(&self) -> Result<Option<ImportOutcome>, SyncError> {
        let state = self.gate.lock().await;

        let bytes = match tokio::fs::read(&self.snapshot_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.snapshot_path.display(), "no snapshot to import");
                return Ok(None);
            }
            Err(e) => return Err(SyncError::Io(e)),
        };

        let fingerprint = codec::fingerprint(&bytes);
        if state.last_exported.as_deref() == Some(fingerprint.as_str()) {
            debug!(%fingerprint, "snapshot is our own export");
            return Ok(None);
        }

        let snapshot = codec::decode(&bytes)?;

        let mut store = self.store.write().await;
        let outcome = apply_snapshot(&mut store, &snapshot, self.probe.as_ref());
        info!(
            %fingerprint,
            created = outcome.created.len(),
            updated = outcome.updated.len(),
            removed = outcome.removed.len(),
            skipped = outcome.skipped.len(),
            "imported snapshot"
        );

        if outcome.changed() {
            // The merged state stays in memory; the next successful save persists it
            if let Err(e) = store.save(&self.store_path) {
                warn!(error = %e, "failed to persist store after import");
            }
        }
        drop(store);

        let _ = self.events.send(RegistryEvent::Imported(outcome.clone()));
        Ok(Some(outcome))
    }

    /// Export the registry to the shared snapshot; failures are logged
    pub async fn export(&self) -> Option<String> {
        let mut state = self.gate.lock().await;
        self.export_locked(&mut state).await
    }

    /// Apply a local mutation, persist it, then export
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut HubStore) -> R) -> Result<R> {
        let mut state = self.gate.lock().await;

        let result = {
            let mut store = self.store.write().await;
            let result = f(&mut store);
            store
                .save(&self.store_path)
                .context("Failed to persist store after mutation")?;
            result
        };

        let _ = self.events.send(RegistryEvent::Mutated);
        self.export_locked(&mut state).await;
        Ok(result)
    }

    /// Update a session's waiting flag, publishing only real changes
    pub async fn set_waiting_for_input(&self, session_id: &str, waiting: bool) -> Result<bool> {
        let change = self
            .mutate(|store| {
                let previous = store.set_waiting_for_input(session_id, waiting)?;
                let name = store.session(session_id)?.name.clone();
                Some((previous, name))
            })
            .await?;

        match change {
            Some((previous, session_name)) if previous != waiting => {
                let _ = self.events.send(RegistryEvent::WaitingChanged {
                    session_id: session_id.to_string(),
                    session_name,
                    waiting,
                });
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn export_locked(&self, state: &mut SyncState) -> Option<String> {
        let snapshot = {
            let store = self.store.read().await;
            build_snapshot(&store, Utc::now())
        };

        let bytes = match codec::encode(&snapshot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "snapshot export skipped");
                return None;
            }
        };
        let fingerprint = codec::fingerprint(&bytes);

        if let Err(e) = atomic_write(&self.snapshot_path, &bytes) {
            warn!(path = %self.snapshot_path.display(), error = %e, "snapshot export skipped");
            return None;
        }

        info!(%fingerprint, projects = snapshot.projects.len(), "exported snapshot");
        state.last_exported = Some(fingerprint.clone());
        let _ = self.events.send(RegistryEvent::Exported {
            fingerprint: fingerprint.clone(),
        });
        Some(fingerprint)
    }
}

/// Delete `*.tmp.*` files older than `max_age` directly inside `dir`
///
/// Returns the number of files removed. A missing directory is not an error.
pub fn cleanup_stale_temps(dir: &Path, max_age: Duration) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut deleted = 0;

    for entry in walkdir::WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.contains(".tmp."));
        if !is_temp {
            continue;
        }

        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok());
        if !matches!(age, Some(age) if age > max_age) {
            continue;
        }

        match fs::remove_file(path) {
            Ok(()) => deleted += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to delete stale temp file"),
        }
    }

    if deleted > 0 {
        info!(deleted, dir = %dir.display(), "removed stale temp files");
    }
    Ok(deleted)
}
