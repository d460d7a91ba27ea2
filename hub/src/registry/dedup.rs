//! Post-migration collapse of project records that share a path.
//!
//! The keeper of each duplicate set is the record with the most linked
//! sessions (ties go to the earliest record in registry order). Sessions and
//! groups of the other records are moved to the keeper before deletion.

use crate::registry::flags::{FlagStore, PROJECT_DEDUP_FLAG};
use crate::registry::models::ProjectId;
use crate::registry::store::HubStore;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub removed_projects: usize,
    pub reassigned_sessions: usize,
    pub reassigned_groups: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupOutcome {
    AlreadyDone,
    Completed(DedupReport),
}

/// Run the dedup pass once
///
/// The store is saved before the flag is set, so a failed save leaves the
/// pass pending for the next start.
pub fn deduplicate_projects(
    store: &mut HubStore,
    store_path: &Path,
    flags: &FlagStore,
) -> Result<DedupOutcome> {
    if flags.is_set(PROJECT_DEDUP_FLAG) {
        debug!("project dedup already complete");
        return Ok(DedupOutcome::AlreadyDone);
    }

    let report = collapse_duplicates(store);
    if report.removed_projects > 0 {
        store
            .save(store_path)
            .context("Failed to save store after dedup")?;
    }
    flags.set(PROJECT_DEDUP_FLAG)?;

    if report.removed_projects > 0 {
        info!(
            removed = report.removed_projects,
            sessions = report.reassigned_sessions,
            groups = report.reassigned_groups,
            "collapsed duplicate projects"
        );
    }
    Ok(DedupOutcome::Completed(report))
}

/// Collapse every path shared by more than one project record
pub fn collapse_duplicates(store: &mut HubStore) -> DedupReport {
    let mut report = DedupReport::default();

    // Paths in first-seen order so ties resolve deterministically
    let mut by_path: Vec<(String, Vec<ProjectId>)> = Vec::new();
    for project in &store.projects {
        match by_path.iter_mut().find(|(path, _)| *path == project.path) {
            Some((_, ids)) => ids.push(project.id.clone()),
            None => by_path.push((project.path.clone(), vec![project.id.clone()])),
        }
    }

    let mut session_counts: HashMap<&str, usize> = HashMap::new();
    for session in &store.sessions {
        *session_counts.entry(session.project_id.as_str()).or_default() += 1;
    }

    // loser id -> keeper id
    let mut reassign: HashMap<ProjectId, ProjectId> = HashMap::new();
    for (_, ids) in by_path.iter().filter(|(_, ids)| ids.len() > 1) {
        let mut keeper = &ids[0];
        for id in &ids[1..] {
            let count = session_counts.get(id.as_str()).copied().unwrap_or(0);
            let best = session_counts.get(keeper.as_str()).copied().unwrap_or(0);
            if count > best {
                keeper = id;
            }
        }
        for id in ids.iter().filter(|id| *id != keeper) {
            reassign.insert(id.clone(), keeper.clone());
        }
    }

    if reassign.is_empty() {
        return report;
    }

    for session in &mut store.sessions {
        if let Some(keeper) = reassign.get(&session.project_id) {
            session.project_id = keeper.clone();
            report.reassigned_sessions += 1;
        }
    }
    for group in &mut store.groups {
        if let Some(keeper) = reassign.get(&group.project_id) {
            group.project_id = keeper.clone();
            report.reassigned_groups += 1;
        }
    }

    let before = store.projects.len();
    store.projects.retain(|p| !reassign.contains_key(&p.id));
    report.removed_projects = before - store.projects.len();

    report
}
