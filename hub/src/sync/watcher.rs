//! Watches the shared snapshot file and triggers imports on change.

use crate::sync::service::RegistrySync;
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Quiet period that collapses a burst of file events into one import
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);

/// Start watching the snapshot file's directory
///
/// Only create/modify events for the snapshot file itself are forwarded. The
/// returned watcher must be kept alive for events to keep flowing.
pub fn watch_snapshot(
    snapshot_path: &Path,
    tx: mpsc::UnboundedSender<PathBuf>,
) -> Result<RecommendedWatcher> {
    let dir = snapshot_path
        .parent()
        .with_context(|| format!("Invalid snapshot path: {}", snapshot_path.display()))?
        .to_path_buf();
    let file_name = snapshot_path
        .file_name()
        .with_context(|| format!("Invalid snapshot path: {}", snapshot_path.display()))?
        .to_os_string();

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    if path.file_name() == Some(file_name.as_os_str()) {
                        debug!("Snapshot change detected: {}", path.display());
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => {
                error!("Snapshot watcher error: {}", e);
            }
        }
    })
    .context("Failed to create snapshot watcher")?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;
    info!("Watching snapshot directory: {}", dir.display());

    Ok(watcher)
}

/// Import on every (debounced) change until cancelled or the channel closes
pub async fn run_import_loop(
    sync: Arc<RegistrySync>,
    mut changes: mpsc::UnboundedReceiver<PathBuf>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => {
                if change.is_none() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(debounce) => {}
                }
                while changes.try_recv().is_ok() {}
                sync.import().await;
            }
        }
    }
    debug!("snapshot import loop stopped");
}
