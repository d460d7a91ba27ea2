//! Shared snapshot format (v1) and its codec.
//!
//! The snapshot only carries the project registry and ordering hints; sessions
//! and groups never leave the host. Version bumps are breaking: a newer
//! version is rejected outright instead of being salvaged field by field.

use crate::error::SyncError;
use crate::registry::models::{ProjectCategory, ProjectRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Highest snapshot version this build reads and the version it writes
pub const SNAPSHOT_VERSION: u32 = 1;

/// Project identity and display fields as exchanged between machines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotProject {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub category: ProjectCategory,
}

impl From<&ProjectRecord> for SnapshotProject {
    fn from(project: &ProjectRecord) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            path: project.path.clone(),
            icon: project.icon.clone(),
            category: project.category,
        }
    }
}

/// Versioned envelope written to the shared sync file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dashboard_order: Vec<String>,
    #[serde(default)]
    pub rail_order: Vec<String>,
    pub projects: Vec<SnapshotProject>,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Encode a snapshot; the output depends only on the snapshot's contents
pub fn encode(snapshot: &SyncSnapshot) -> Result<Vec<u8>, SyncError> {
    let mut bytes = serde_json::to_vec_pretty(snapshot)
        .map_err(|e| SyncError::SnapshotCorrupt(format!("failed to encode snapshot: {}", e)))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode a snapshot, rejecting corrupt payloads and newer versions
pub fn decode(bytes: &[u8]) -> Result<SyncSnapshot, SyncError> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| SyncError::SnapshotCorrupt(e.to_string()))?;

    if probe.version > SNAPSHOT_VERSION {
        return Err(SyncError::SnapshotVersionUnsupported {
            found: probe.version,
            supported: SNAPSHOT_VERSION,
        });
    }

    serde_json::from_slice(bytes).map_err(|e| SyncError::SnapshotCorrupt(e.to_string()))
}

/// Short digest of encoded bytes for comparing exports across machines
pub fn fingerprint(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..8])
}
