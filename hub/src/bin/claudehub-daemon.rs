// ClaudeHub host daemon
// Keeps the local registry in sync with the shared snapshot and serves
// local control requests on a Unix socket

use anyhow::{Context, Result};
use claudehub_lib::attention::gate::forward_waiting_events;
use claudehub_lib::attention::{NotificationGate, TerminalAlertSink};
use claudehub_lib::config::{Config, Settings};
use claudehub_lib::control::{bind_control_socket, serve_control, ControlState};
use claudehub_lib::registry::{bootstrap_registry, FlagStore};
use claudehub_lib::sync::engine::LocalFilesystem;
use claudehub_lib::sync::service::{cleanup_stale_temps, RegistrySync, STALE_TEMP_AGE};
use claudehub_lib::sync::watcher::{run_import_loop, watch_snapshot, DEFAULT_DEBOUNCE};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("claudehub_lib=info".parse().unwrap())
                .add_directive("claudehub_daemon=info".parse().unwrap())
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    if let Err(e) = run().await {
        error!("Daemon fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = Config::from_env();
    config
        .ensure_dirs()
        .context("Failed to create data directories")?;

    if config.is_daemon_running() {
        eprintln!("Daemon already running (PID: {:?})", config.read_pid());
        std::process::exit(1);
    }
    config.write_pid().context("Failed to write PID file")?;

    let result = serve(&config).await;

    config.remove_pid().ok();
    config.remove_socket().ok();
    info!("claudehub-daemon stopped");
    result
}

async fn serve(config: &Config) -> Result<()> {
    info!(
        state_dir = %config.state_dir.display(),
        sync_dir = %config.sync_dir.display(),
        "claudehub-daemon starting"
    );

    let settings = Settings::load(config);
    let flags = FlagStore::open(&config.flags_file())?;
    let (store, report) = bootstrap_registry(config, &settings, &flags)?;
    info!(
        projects = store.projects.len(),
        sessions = store.sessions.len(),
        seeded = report.seeded,
        markers = report.markers_imported,
        "registry ready"
    );

    if let Err(e) = cleanup_stale_temps(&config.sync_dir, STALE_TEMP_AGE) {
        warn!(error = %e, "stale temp cleanup failed");
    }

    let sync = Arc::new(RegistrySync::new(
        store,
        config.store_file(),
        config.snapshot_file(),
        Arc::new(LocalFilesystem),
    ));

    // Pick up what other machines wrote while we were down, then publish
    // our registry if nobody has yet
    sync.import().await;
    if !sync.snapshot_path().exists() {
        sync.export().await;
    }

    let gate = Arc::new(NotificationGate::new(
        settings.notifications.clone(),
        Arc::new(TerminalAlertSink::default()),
    ));
    let waiting: Vec<(String, String)> = sync
        .read(|store| {
            store
                .sessions
                .iter()
                .filter(|s| s.waiting_for_input && !s.is_completed)
                .map(|s| (s.id.clone(), s.name.clone()))
                .collect()
        })
        .await;
    for (id, name) in &waiting {
        gate.notify(id, name);
    }

    let listener = bind_control_socket(config)?;

    let cancel = CancellationToken::new();
    let (change_tx, change_rx) = mpsc::unbounded_channel();
    // Watcher must stay alive for the lifetime of the import loop
    let _watcher = watch_snapshot(sync.snapshot_path(), change_tx)?;

    let import_task = tokio::spawn(run_import_loop(
        Arc::clone(&sync),
        change_rx,
        DEFAULT_DEBOUNCE,
        cancel.clone(),
    ));
    let alert_task = tokio::spawn(forward_waiting_events(
        sync.subscribe(),
        Arc::clone(&gate),
        cancel.clone(),
    ));

    // Shutdown signal channel, fed by ctrl-c and the control socket
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        let _ = ctrl_c_tx.send(()).await;
    });

    let control = Arc::new(ControlState {
        sync: Arc::clone(&sync),
        gate: Arc::clone(&gate),
        shutdown_tx,
    });
    let control_task = tokio::spawn(serve_control(listener, control, cancel.clone()));

    info!(socket = %config.socket_path.display(), "claudehub-daemon running");
    shutdown_rx.recv().await;
    info!("Shutting down daemon...");

    cancel.cancel();
    for (name, task) in [
        ("import", import_task),
        ("alerts", alert_task),
        ("control", control_task),
    ] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "background task ended abnormally");
        }
    }

    Ok(())
}
