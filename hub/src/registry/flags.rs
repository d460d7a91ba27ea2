//! Persisted one-time operation flags.
//!
//! Flags are set-only: once a migration or dedup pass records completion, the
//! flag is never cleared automatically.

use crate::registry::store::atomic_write;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Legacy flat-file import finished
pub const LEGACY_MIGRATION_FLAG: &str = "legacyMigrationV1Complete";
/// Default projects exist; the seeding path must not add them again
pub const DEFAULT_PROJECTS_SEEDED_FLAG: &str = "defaultProjectsSeeded";
/// Path-based project dedup finished
pub const PROJECT_DEDUP_FLAG: &str = "projectDedupV1Complete";

/// Boolean flags keyed by name, persisted to flags.json
#[derive(Debug)]
pub struct FlagStore {
    path: PathBuf,
    flags: Mutex<BTreeMap<String, bool>>,
}

impl FlagStore {
    /// Open the flag file; a missing file means no flag is set
    pub fn open(path: &Path) -> Result<Self> {
        let flags = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read flags file: {}", path.display()))?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&contents)
                    .with_context(|| format!("Failed to parse flags file: {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            flags: Mutex::new(flags),
        })
    }

    fn flags(&self) -> MutexGuard<'_, BTreeMap<String, bool>> {
        self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.flags()
            .get(name)
            .copied()
            .unwrap_or(false)
    }

    /// Set a flag and persist immediately
    pub fn set(&self, name: &str) -> Result<()> {
        let mut flags = self.flags();
        if flags.get(name) == Some(&true) {
            return Ok(());
        }
        flags.insert(name.to_string(), true);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&*flags)?;
        atomic_write(&self.path, &contents)
    }
}
