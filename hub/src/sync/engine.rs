//! Merge rules between the local registry and a decoded snapshot.
//!
//! Path is the merge key: machines assign identities independently before
//! their first sync, so the same folder is recognized by its path. The
//! snapshot is display-authoritative for every project it lists whose folder
//! exists here.

use crate::registry::models::{new_id, ProjectId, ProjectRecord};
use crate::registry::store::HubStore;
use crate::sync::codec::{SnapshotProject, SyncSnapshot, SNAPSHOT_VERSION};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

/// Answers whether a project folder exists on this machine
pub trait PathProbe: Send + Sync {
    fn exists(&self, path: &str) -> bool;
}

/// Real filesystem probe
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl PathProbe for LocalFilesystem {
    fn exists(&self, path: &str) -> bool {
        Path::new(path).is_dir()
    }
}

/// What one import changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportOutcome {
    pub created: Vec<ProjectId>,
    pub updated: Vec<ProjectId>,
    pub removed: Vec<ProjectId>,
    /// Snapshot paths with no folder on this machine
    pub skipped: Vec<String>,
    pub ordering_updated: bool,
}

impl ImportOutcome {
    pub fn changed(&self) -> bool {
        !self.created.is_empty()
            || !self.updated.is_empty()
            || !self.removed.is_empty()
            || self.ordering_updated
    }
}

/// Apply a snapshot to the local registry
pub fn apply_snapshot(
    store: &mut HubStore,
    snapshot: &SyncSnapshot,
    probe: &dyn PathProbe,
) -> ImportOutcome {
    let mut outcome = ImportOutcome::default();
    let mut listed: HashSet<&str> = HashSet::new();

    for incoming in &snapshot.projects {
        if !listed.insert(incoming.path.as_str()) {
            warn!(path = %incoming.path, "duplicate path in snapshot, keeping first entry");
            continue;
        }

        if !probe.exists(&incoming.path) {
            debug!(path = %incoming.path, "snapshot project not present on this machine");
            outcome.skipped.push(incoming.path.clone());
            continue;
        }

        match store.project_by_path_mut(&incoming.path) {
            Some(local) => {
                if overwrite_display_fields(local, incoming) {
                    outcome.updated.push(local.id.clone());
                }
            }
            None => {
                let id = adoptable_id(store, incoming);
                store.upsert_project(ProjectRecord {
                    id: id.clone(),
                    name: incoming.name.clone(),
                    icon: incoming.icon.clone(),
                    category: incoming.category,
                    path: incoming.path.clone(),
                });
                outcome.created.push(id);
            }
        }
    }

    // Absent from the snapshot but present on disk: removed on another machine
    let removed: Vec<ProjectId> = store
        .projects
        .iter()
        .filter(|p| !listed.contains(p.path.as_str()) && probe.exists(&p.path))
        .map(|p| p.id.clone())
        .collect();
    for id in removed {
        if let Some(project) = store.remove_project(&id) {
            debug!(id = %project.id, path = %project.path, "removing project absent from snapshot");
            outcome.removed.push(project.id);
        }
    }

    // Empty lists mean "no opinion", never "clear"
    if !snapshot.dashboard_order.is_empty()
        && snapshot.dashboard_order != store.preferences.dashboard_order
    {
        store.preferences.dashboard_order = snapshot.dashboard_order.clone();
        outcome.ordering_updated = true;
    }
    if !snapshot.rail_order.is_empty() && snapshot.rail_order != store.preferences.rail_order {
        store.preferences.rail_order = snapshot.rail_order.clone();
        outcome.ordering_updated = true;
    }

    outcome
}

/// Build the snapshot this machine exports
pub fn build_snapshot(store: &HubStore, exported_at: DateTime<Utc>) -> SyncSnapshot {
    SyncSnapshot {
        version: SNAPSHOT_VERSION,
        exported_at: Some(exported_at),
        dashboard_order: store.preferences.dashboard_order.clone(),
        rail_order: store.preferences.rail_order.clone(),
        projects: store.projects.iter().map(SnapshotProject::from).collect(),
    }
}

fn overwrite_display_fields(local: &mut ProjectRecord, incoming: &SnapshotProject) -> bool {
    let changed = local.name != incoming.name
        || local.icon != incoming.icon
        || local.category != incoming.category;
    local.name = incoming.name.clone();
    local.icon = incoming.icon.clone();
    local.category = incoming.category;
    changed
}

/// Adopt the snapshot's id unless a record at another path already owns it
fn adoptable_id(store: &HubStore, incoming: &SnapshotProject) -> ProjectId {
    match store.project_by_id(&incoming.id) {
        Some(clash) => {
            warn!(
                id = %incoming.id,
                incoming_path = %incoming.path,
                local_path = %clash.path,
                "snapshot id already used locally, minting a new one"
            );
            new_id()
        }
        None => incoming.id.clone(),
    }
}
