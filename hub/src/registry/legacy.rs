//! One-time import of the legacy flat-file registry into the structured store.
//!
//! Legacy layout:
//! - `<legacy_dir>/projects.json` with `mainProjects` / `clientProjects` lists
//! - `<project>/.taskgroups.json` and `<project>/.sessions.json` per project
//! - the development project's files live at `<legacy_dir>/dev-taskgroups.json`
//!   and `<legacy_dir>/dev-sessions.json`
//!
//! The import is idempotent by identity-preserving upsert. A failed run leaves
//! the completion flag unset, so the next startup simply runs it again.

use crate::config::DevProjectSettings;
use crate::registry::flags::{FlagStore, DEFAULT_PROJECTS_SEEDED_FLAG, LEGACY_MIGRATION_FLAG};
use crate::registry::models::{
    GroupRecord, ProjectCategory, ProjectId, ProjectRecord, SessionRecord,
};
use crate::registry::store::HubStore;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the legacy files live
#[derive(Debug, Clone)]
pub struct LegacyLayout {
    dir: PathBuf,
}

impl LegacyLayout {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    pub fn projects_file(&self) -> PathBuf {
        self.dir.join("projects.json")
    }

    fn groups_file(&self, project: &ProjectRecord) -> PathBuf {
        match project.category {
            ProjectCategory::Development => self.dir.join("dev-taskgroups.json"),
            _ => Path::new(&project.path).join(".taskgroups.json"),
        }
    }

    fn sessions_file(&self, project: &ProjectRecord) -> PathBuf {
        match project.category {
            ProjectCategory::Development => self.dir.join("dev-sessions.json"),
            _ => Path::new(&project.path).join(".sessions.json"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LegacyProjectsFile {
    main_projects: Vec<LegacyProject>,
    client_projects: Vec<LegacyProject>,
}

#[derive(Debug, Deserialize)]
struct LegacyProject {
    name: String,
    path: String,
    #[serde(default)]
    icon: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyGroup {
    id: String,
    name: String,
    #[serde(default)]
    sort_order: i32,
    #[serde(default = "default_true")]
    is_expanded: bool,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacySession {
    id: String,
    name: String,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    briefing: Option<String>,
    #[serde(default)]
    claude_session_id: Option<String>,
    #[serde(default)]
    task_group_id: Option<String>,
    #[serde(default)]
    is_completed: bool,
    #[serde(default)]
    completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    last_log_saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    log_file_path: Option<String>,
    #[serde(default)]
    is_waiting_for_input: bool,
}

fn default_true() -> bool {
    true
}

/// Counts of records written by one migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub projects: usize,
    pub groups: usize,
    pub sessions: usize,
    /// Session group links dropped because the group was never imported
    pub unresolved_group_links: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The completion flag was already set; nothing ran
    AlreadyDone,
    Completed(MigrationReport),
}

/// Imports legacy projects, groups and sessions exactly once
pub struct LegacyMigrator<'a> {
    layout: LegacyLayout,
    flags: &'a FlagStore,
    dev_project: &'a DevProjectSettings,
}

impl<'a> LegacyMigrator<'a> {
    pub fn new(
        layout: LegacyLayout,
        flags: &'a FlagStore,
        dev_project: &'a DevProjectSettings,
    ) -> Self {
        Self {
            layout,
            flags,
            dev_project,
        }
    }

    /// Run the migration if it has not completed yet
    ///
    /// Safe to call on every startup. On error the completion flag stays
    /// unset; records already upserted into `store` are not rolled back.
    pub fn migrate(&self, store: &mut HubStore, store_path: &Path) -> Result<MigrationOutcome> {
        if self.flags.is_set(LEGACY_MIGRATION_FLAG) {
            debug!("legacy migration already complete");
            return Ok(MigrationOutcome::AlreadyDone);
        }

        info!(dir = %self.layout.dir.display(), "starting legacy migration");
        let report = self.import_all(store)?;

        store.save(store_path)?;
        self.flags.set(LEGACY_MIGRATION_FLAG)?;
        self.flags.set(DEFAULT_PROJECTS_SEEDED_FLAG)?;

        info!(
            projects = report.projects,
            groups = report.groups,
            sessions = report.sessions,
            unresolved_group_links = report.unresolved_group_links,
            "legacy migration complete"
        );
        Ok(MigrationOutcome::Completed(report))
    }

    fn import_all(&self, store: &mut HubStore) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        // Step 1: projects, plus the app's own development project
        let legacy: LegacyProjectsFile = read_legacy(&self.layout.projects_file())?;
        let mut imported: Vec<ProjectId> = Vec::new();

        let tagged = legacy
            .main_projects
            .iter()
            .map(|p| (p, ProjectCategory::Primary))
            .chain(
                legacy
                    .client_projects
                    .iter()
                    .map(|p| (p, ProjectCategory::Client)),
            );
        for (project, category) in tagged {
            let id = upsert_project_by_path(
                store,
                &project.name,
                &project.path,
                &project.icon,
                category,
            );
            if !imported.contains(&id) {
                imported.push(id);
            }
        }

        let dev_id = ensure_dev_project(store, self.dev_project);
        if !imported.contains(&dev_id) {
            imported.push(dev_id);
        }
        report.projects = imported.len();

        // Step 2: groups, identities preserved so session links resolve
        for project_id in &imported {
            let Some(project) = store.project_by_id(project_id).cloned() else {
                continue;
            };
            let groups: Vec<LegacyGroup> = read_legacy(&self.layout.groups_file(&project))?;
            for group in groups {
                store.upsert_group(GroupRecord {
                    id: group.id,
                    name: group.name,
                    project_id: project.id.clone(),
                    sort_order: group.sort_order,
                    is_expanded: group.is_expanded,
                    created_at: group.created_at.unwrap_or_else(Utc::now),
                });
                report.groups += 1;
            }
        }

        // Step 3: sessions, resolving project and group references
        for project_id in &imported {
            let Some(project) = store.project_by_id(project_id).cloned() else {
                continue;
            };
            let sessions: Vec<LegacySession> =
                read_legacy(&self.layout.sessions_file(&project))?;
            for legacy in sessions {
                let group_id = match legacy.task_group_id {
                    Some(group_id) if store.group(&group_id).is_some() => Some(group_id),
                    Some(group_id) => {
                        warn!(session = %legacy.id, group = %group_id, "dropping unresolved group link");
                        report.unresolved_group_links += 1;
                        None
                    }
                    None => None,
                };

                let created_at = legacy.created_at.unwrap_or_else(Utc::now);
                store.upsert_session(SessionRecord {
                    id: legacy.id,
                    name: legacy.name,
                    project_id: project.id.clone(),
                    project_path: project.path.clone(),
                    created_at,
                    last_accessed_at: legacy.last_accessed_at.unwrap_or(created_at),
                    briefing: legacy.briefing,
                    conversation_id: legacy.claude_session_id,
                    group_id,
                    is_completed: legacy.is_completed,
                    completed_at: legacy.completed_at,
                    last_log_saved_at: legacy.last_log_saved_at,
                    summary: legacy.summary,
                    log_file: legacy.log_file_path,
                    waiting_for_input: legacy.is_waiting_for_input,
                });
                report.sessions += 1;
            }
        }

        Ok(report)
    }
}

/// First-run seeding of default projects, skipped once migration (or a previous seed) ran
///
/// Returns true when the development project was seeded by this call.
pub fn seed_default_projects(
    store: &mut HubStore,
    store_path: &Path,
    flags: &FlagStore,
    dev_project: &DevProjectSettings,
) -> Result<bool> {
    if flags.is_set(DEFAULT_PROJECTS_SEEDED_FLAG) {
        return Ok(false);
    }

    ensure_dev_project(store, dev_project);
    store.save(store_path)?;
    flags.set(DEFAULT_PROJECTS_SEEDED_FLAG)?;
    info!(path = %dev_project.path, "seeded default projects");
    Ok(true)
}

/// Make sure the development project exists, returning its id
pub fn ensure_dev_project(store: &mut HubStore, dev_project: &DevProjectSettings) -> ProjectId {
    if let Some(existing) = store.project_by_path(&dev_project.path) {
        return existing.id.clone();
    }

    let project = ProjectRecord::new(
        &dev_project.name,
        &dev_project.path,
        &dev_project.icon,
        ProjectCategory::Development,
    );
    let id = project.id.clone();
    store.upsert_project(project);
    id
}

fn upsert_project_by_path(
    store: &mut HubStore,
    name: &str,
    path: &str,
    icon: &str,
    category: ProjectCategory,
) -> ProjectId {
    if let Some(existing) = store.project_by_path_mut(path) {
        existing.name = name.to_string();
        existing.icon = icon.to_string();
        existing.category = category;
        return existing.id.clone();
    }

    let project = ProjectRecord::new(name, path, icon, category);
    let id = project.id.clone();
    store.upsert_project(project);
    id
}

/// Read a legacy JSON file; a missing file reads as the empty default
fn read_legacy<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read legacy file: {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(T::default());
    }

    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse legacy file: {}", path.display()))
}
