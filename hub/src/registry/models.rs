//! Registry records: projects, sessions and session groups.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable project identity; shared across machines once synced
pub type ProjectId = String;
pub type SessionId = String;
pub type GroupId = String;

/// Mint a fresh identity for a record created on this machine
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Project category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectCategory {
    #[default]
    Primary,
    Client,
    Development,
}

impl std::fmt::Display for ProjectCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            ProjectCategory::Primary => "primary",
            ProjectCategory::Client => "client",
            ProjectCategory::Development => "development",
        })
    }
}

impl std::str::FromStr for ProjectCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(ProjectCategory::Primary),
            "client" => Ok(ProjectCategory::Client),
            "development" => Ok(ProjectCategory::Development),
            _ => Err(format!("Unknown project category: {}", s)),
        }
    }
}

/// A project folder known to this host
///
/// `path` is the merge key across machines; `id` is assigned once and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    pub icon: String,
    pub category: ProjectCategory,
    pub path: String,
}

impl ProjectRecord {
    pub fn new(name: &str, path: &str, icon: &str, category: ProjectCategory) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            icon: icon.to_string(),
            category,
            path: path.to_string(),
        }
    }
}

/// A coding-assistant session inside a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: SessionId,
    pub name: String,
    /// Owning project (reference, never ownership)
    pub project_id: ProjectId,
    /// Path of the owning project, kept so the link can be re-resolved
    pub project_path: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Automation briefing text this session was started from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub briefing: Option<String>,
    /// External conversation id for resuming the assistant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_log_saved_at: Option<DateTime<Utc>>,
    /// Human-written summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(default)]
    pub waiting_for_input: bool,
}

impl SessionRecord {
    pub fn new(name: &str, project: &ProjectRecord) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: name.to_string(),
            project_id: project.id.clone(),
            project_path: project.path.clone(),
            created_at: now,
            last_accessed_at: now,
            briefing: None,
            conversation_id: None,
            group_id: None,
            is_completed: false,
            completed_at: None,
            last_log_saved_at: None,
            summary: None,
            log_file: None,
            waiting_for_input: false,
        }
    }
}

/// A user-defined grouping of sessions within one project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub project_id: ProjectId,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default = "default_expanded")]
    pub is_expanded: bool,
    pub created_at: DateTime<Utc>,
}

fn default_expanded() -> bool {
    true
}

/// UI ordering hints; reconstructed on every machine, never authoritative data
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OrderingPreferences {
    /// Project paths in dashboard order
    pub dashboard_order: Vec<String>,
    /// Project paths in sidebar rail order
    pub rail_order: Vec<String>,
}
