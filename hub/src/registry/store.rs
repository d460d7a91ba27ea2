// Persistence for the structured project/session registry
// The registry is persisted to $STATE/store.json with file locking and atomic replace

use crate::registry::models::{
    GroupRecord, OrderingPreferences, ProjectRecord, SessionId, SessionRecord,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Registry of projects, sessions and groups owned by this host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HubStore {
    pub projects: Vec<ProjectRecord>,
    pub sessions: Vec<SessionRecord>,
    pub groups: Vec<GroupRecord>,
    pub preferences: OrderingPreferences,
}

impl HubStore {
    /// Load the registry from disk, creating an empty one if it doesn't exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read store file: {}", path.display()))?;

        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse store file: {}", path.display()))
    }

    /// Save the registry under an exclusive lock, replacing the file atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create store directory: {}", parent.display())
            })?;
        }

        let lock_path = lock_path_for(path);
        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

        // TODO(windows): fs2 locks are advisory only; verify behavior with LockFileEx
        lock_file
            .lock_exclusive()
            .with_context(|| "Failed to acquire exclusive lock on store file")?;

        let contents =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize store")?;
        atomic_write(path, &contents)?;

        // Lock is released when lock_file is dropped
        Ok(())
    }

    pub fn project_by_path(&self, path: &str) -> Option<&ProjectRecord> {
        self.projects.iter().find(|p| p.path == path)
    }

    pub fn project_by_id(&self, id: &str) -> Option<&ProjectRecord> {
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn project_by_path_mut(&mut self, path: &str) -> Option<&mut ProjectRecord> {
        self.projects.iter_mut().find(|p| p.path == path)
    }

    /// Insert a project, replacing any record with the same id
    pub fn upsert_project(&mut self, project: ProjectRecord) {
        match self.projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project,
            None => self.projects.push(project),
        }
    }

    /// Remove a project record; dependent sessions and groups are left untouched
    pub fn remove_project(&mut self, id: &str) -> Option<ProjectRecord> {
        let index = self.projects.iter().position(|p| p.id == id)?;
        Some(self.projects.remove(index))
    }

    pub fn session(&self, id: &str) -> Option<&SessionRecord> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut SessionRecord> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Insert a session, replacing any record with the same id
    pub fn upsert_session(&mut self, session: SessionRecord) {
        match self.session_mut(&session.id) {
            Some(existing) => *existing = session,
            None => self.sessions.push(session),
        }
    }

    /// Get all sessions linked to a project
    pub fn sessions_for_project(&self, project_id: &str) -> Vec<&SessionRecord> {
        self.sessions
            .iter()
            .filter(|s| s.project_id == project_id)
            .collect()
    }

    pub fn group(&self, id: &str) -> Option<&GroupRecord> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Insert a group, replacing any record with the same id
    pub fn upsert_group(&mut self, group: GroupRecord) {
        match self.groups.iter_mut().find(|g| g.id == group.id) {
            Some(existing) => *existing = group,
            None => self.groups.push(group),
        }
    }

    /// Create a session in a known project
    pub fn create_session(&mut self, name: &str, project_id: &str) -> Result<SessionId> {
        let project = self
            .project_by_id(project_id)
            .with_context(|| format!("Unknown project: {}", project_id))?;
        let session = SessionRecord::new(name, project);
        let id = session.id.clone();
        self.sessions.push(session);
        Ok(id)
    }

    pub fn rename_session(&mut self, id: &str, name: &str) -> bool {
        match self.session_mut(id) {
            Some(session) => {
                session.name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Toggle completion; the completion timestamp follows the flag
    pub fn set_session_completed(&mut self, id: &str, completed: bool) -> bool {
        match self.session_mut(id) {
            Some(session) => {
                session.is_completed = completed;
                session.completed_at = completed.then(Utc::now);
                true
            }
            None => false,
        }
    }

    pub fn set_session_summary(&mut self, id: &str, summary: Option<String>) -> bool {
        match self.session_mut(id) {
            Some(session) => {
                session.summary = summary;
                true
            }
            None => false,
        }
    }

    /// Record that a session log was written
    pub fn record_log_saved(&mut self, id: &str, log_file: &str) -> bool {
        match self.session_mut(id) {
            Some(session) => {
                session.log_file = Some(log_file.to_string());
                session.last_log_saved_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Update the waiting flag, returning the previous value
    pub fn set_waiting_for_input(&mut self, id: &str, waiting: bool) -> Option<bool> {
        let session = self.session_mut(id)?;
        let previous = session.waiting_for_input;
        session.waiting_for_input = waiting;
        Some(previous)
    }

    pub fn touch_session(&mut self, id: &str) -> bool {
        match self.session_mut(id) {
            Some(session) => {
                session.last_accessed_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Explicit user deletion; the only way a session leaves the registry
    pub fn delete_session(&mut self, id: &str) -> Option<SessionRecord> {
        let index = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(index))
    }

    /// Batch-create sessions from external markers
    ///
    /// Markers for unknown projects, or whose conversation id is already
    /// linked to a session, are skipped. Returns the number of sessions created.
    pub fn import_session_markers(&mut self, markers: &[SessionMarker]) -> usize {
        let mut created = 0;

        for marker in markers {
            if let Some(conversation_id) = &marker.conversation_id {
                if self
                    .sessions
                    .iter()
                    .any(|s| s.conversation_id.as_ref() == Some(conversation_id))
                {
                    continue;
                }
            }

            let Some(project) = self.project_by_path(&marker.project_path) else {
                continue;
            };

            let mut session = SessionRecord::new(&marker.name, project);
            session.conversation_id = marker.conversation_id.clone();
            session.briefing = marker.briefing.clone();
            if let Some(created_at) = marker.created_at {
                session.created_at = created_at;
                session.last_accessed_at = created_at;
            }
            self.sessions.push(session);
            created += 1;
        }

        created
    }
}

/// An externally started session waiting to be registered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMarker {
    pub name: String,
    pub project_path: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub briefing: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Read a session marker file (a JSON list); a missing file yields no markers
pub fn read_session_markers(path: &Path) -> Result<Vec<SessionMarker>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read marker file: {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse marker file: {}", path.display()))
}

fn lock_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("store");
    path.with_file_name(format!(".{}.lock", name))
}

/// Atomically save data to a file using write-to-temp + rename
/// Concurrent readers see either the old or the new file, never a partial one
pub fn atomic_write(path: &Path, contents: impl AsRef<[u8]>) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Invalid path: {}", path.display()))?;

    // Temp file in the same directory so the rename stays on one filesystem
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown"),
        std::process::id()
    ));

    fs::write(&temp_path, contents)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;

    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;

    Ok(())
}
