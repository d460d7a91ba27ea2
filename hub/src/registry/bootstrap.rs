//! Startup preparation of the local registry.
//!
//! Order matters: legacy migration feeds the registry, dedup runs right after
//! it, then first-run seeding and the session marker import. Each one-time
//! step is gated by its own flag, so running this on every start is safe.

use crate::config::{Config, Settings};
use crate::registry::dedup::{deduplicate_projects, DedupOutcome};
use crate::registry::flags::FlagStore;
use crate::registry::legacy::{seed_default_projects, LegacyLayout, LegacyMigrator, MigrationOutcome};
use crate::registry::store::{read_session_markers, HubStore};
use anyhow::Result;
use std::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// None when migration failed and will be retried next start
    pub migration: Option<MigrationOutcome>,
    pub dedup: Option<DedupOutcome>,
    pub seeded: bool,
    pub markers_imported: usize,
}

/// Load the store and run every pending startup step
///
/// Only an unreadable store is fatal. Step failures are logged and the step
/// runs again on the next start.
pub fn bootstrap_registry(
    config: &Config,
    settings: &Settings,
    flags: &FlagStore,
) -> Result<(HubStore, BootstrapReport)> {
    let store_path = config.store_file();
    let mut store = HubStore::load(&store_path)?;
    let mut report = BootstrapReport::default();

    let migrator = LegacyMigrator::new(
        LegacyLayout::new(&config.legacy_dir),
        flags,
        &settings.dev_project,
    );
    match migrator.migrate(&mut store, &store_path) {
        Ok(outcome) => report.migration = Some(outcome),
        Err(e) => {
            warn!("Legacy migration incomplete, will retry next start: {:#}", e);
            // Drop half-imported records; the retry upserts the same identities
            store = HubStore::load(&store_path)?;
        }
    }

    // Dedup waits for a completed migration so it never runs on a half-fed registry
    if report.migration.is_some() {
        match deduplicate_projects(&mut store, &store_path, flags) {
            Ok(outcome) => report.dedup = Some(outcome),
            Err(e) => warn!("Project dedup incomplete, will retry next start: {:#}", e),
        }
    }

    match seed_default_projects(&mut store, &store_path, flags, &settings.dev_project) {
        Ok(seeded) => report.seeded = seeded,
        Err(e) => warn!("Default project seeding failed: {:#}", e),
    }

    let markers_path = config.session_markers_file();
    match read_session_markers(&markers_path) {
        Ok(markers) if !markers.is_empty() => {
            let created = store.import_session_markers(&markers);
            match store.save(&store_path) {
                Ok(()) => {
                    if let Err(e) = fs::remove_file(&markers_path) {
                        warn!(path = %markers_path.display(), error = %e, "failed to remove marker file");
                    }
                    info!(created, "imported session markers");
                    report.markers_imported = created;
                }
                // Marker file stays; already-linked markers are skipped on retry
                Err(e) => warn!("Failed to save store after marker import: {:#}", e),
            }
        }
        Ok(_) => {}
        Err(e) => warn!("Skipping session markers: {:#}", e),
    }

    Ok((store, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::flags::{
        DEFAULT_PROJECTS_SEEDED_FLAG, LEGACY_MIGRATION_FLAG, PROJECT_DEDUP_FLAG,
    };
    use crate::registry::models::{ProjectCategory, ProjectRecord};
    use std::path::Path;
    use tempfile::TempDir;

    fn setup(temp: &Path) -> (Config, Settings) {
        let config = Config::rooted_at(temp.to_path_buf());
        config.ensure_dirs().unwrap();
        let mut settings = Settings::default();
        settings.dev_project.path = temp.join("dev").to_string_lossy().into_owned();
        (config, settings)
    }

    #[test]
    fn test_first_run_without_legacy_files() {
        let temp = TempDir::new().unwrap();
        let (config, settings) = setup(temp.path());
        let flags = FlagStore::open(&config.flags_file()).unwrap();

        let (store, report) = bootstrap_registry(&config, &settings, &flags).unwrap();

        assert!(matches!(report.migration, Some(MigrationOutcome::Completed(_))));
        assert!(!report.seeded, "migration already seeded the dev project");
        assert_eq!(store.projects.len(), 1);
        assert_eq!(store.projects[0].category, ProjectCategory::Development);
    }

    #[test]
    fn test_second_run_changes_nothing() {
        let temp = TempDir::new().unwrap();
        let (config, settings) = setup(temp.path());
        fs::write(
            config.legacy_dir.join("projects.json"),
            r#"{"mainProjects":[{"name":"Acme","path":"/work/acme","icon":"a"}],"clientProjects":[]}"#,
        )
        .unwrap();
        let flags = FlagStore::open(&config.flags_file()).unwrap();

        let (first, _) = bootstrap_registry(&config, &settings, &flags).unwrap();
        let (second, report) = bootstrap_registry(&config, &settings, &flags).unwrap();

        assert_eq!(first, second);
        assert_eq!(report.migration, Some(MigrationOutcome::AlreadyDone));
        assert_eq!(report.dedup, Some(DedupOutcome::AlreadyDone));
    }

    #[test]
    fn test_failed_migration_is_retried() {
        let temp = TempDir::new().unwrap();
        let (config, settings) = setup(temp.path());
        let projects_file = config.legacy_dir.join("projects.json");
        fs::write(&projects_file, "{ not json").unwrap();
        let flags = FlagStore::open(&config.flags_file()).unwrap();

        let (_, report) = bootstrap_registry(&config, &settings, &flags).unwrap();
        assert_eq!(report.migration, None);

        fs::write(
            &projects_file,
            r#"{"mainProjects":[{"name":"Acme","path":"/work/acme","icon":"a"}]}"#,
        )
        .unwrap();
        let (store, report) = bootstrap_registry(&config, &settings, &flags).unwrap();
        assert!(matches!(report.migration, Some(MigrationOutcome::Completed(_))));
        assert_eq!(
            store.projects.iter().filter(|p| p.path == "/work/acme").count(),
            1
        );
    }

    #[test]
    fn test_session_markers_imported_once() {
        let temp = TempDir::new().unwrap();
        let (config, settings) = setup(temp.path());
        let flags = FlagStore::open(&config.flags_file()).unwrap();
        bootstrap_registry(&config, &settings, &flags).unwrap();

        fs::write(
            config.session_markers_file(),
            format!(
                r#"[{{"name":"From hook","projectPath":"{}"}}]"#,
                settings.dev_project.path
            ),
        )
        .unwrap();

        let (store, report) = bootstrap_registry(&config, &settings, &flags).unwrap();
        assert_eq!(report.markers_imported, 1);
        assert_eq!(store.sessions.len(), 1);
        assert!(!config.session_markers_file().exists());

        let (store, _) = bootstrap_registry(&config, &settings, &flags).unwrap();
        assert_eq!(store.sessions.len(), 1);
    }

    #[test]
    fn test_dedup_save_failure_is_not_fatal() {
        let temp = TempDir::new().unwrap();
        let (config, settings) = setup(temp.path());
        let flags = FlagStore::open(&config.flags_file()).unwrap();
        flags.set(LEGACY_MIGRATION_FLAG).unwrap();
        flags.set(DEFAULT_PROJECTS_SEEDED_FLAG).unwrap();

        let mut store = HubStore::default();
        for name in ["Acme", "Acme copy"] {
            store.projects.push(ProjectRecord::new(
                name,
                "/work/acme",
                "",
                ProjectCategory::Primary,
            ));
        }
        store.save(&config.store_file()).unwrap();

        let blocker = config.state_dir.join(".store.json.lock");
        fs::remove_file(&blocker).ok();
        fs::create_dir(&blocker).unwrap();

        let (_, report) = bootstrap_registry(&config, &settings, &flags).unwrap();
        assert_eq!(report.dedup, None);
        assert!(!flags.is_set(PROJECT_DEDUP_FLAG));

        fs::remove_dir(&blocker).unwrap();
        let (store, report) = bootstrap_registry(&config, &settings, &flags).unwrap();
        assert!(matches!(report.dedup, Some(DedupOutcome::Completed(ref r)) if r.removed_projects == 1));
        assert_eq!(
            store.projects.iter().filter(|p| p.path == "/work/acme").count(),
            1
        );
        let on_disk = HubStore::load(&config.store_file()).unwrap();
        assert_eq!(on_disk.projects.len(), 1);
    }

    #[test]
    fn test_dedup_waits_for_migration() {
        let temp = TempDir::new().unwrap();
        let (config, settings) = setup(temp.path());
        fs::write(config.legacy_dir.join("projects.json"), "{ not json").unwrap();
        let flags = FlagStore::open(&config.flags_file()).unwrap();

        let (_, report) = bootstrap_registry(&config, &settings, &flags).unwrap();
        assert_eq!(report.migration, None);
        assert_eq!(report.dedup, None);
        assert!(!flags.is_set(PROJECT_DEDUP_FLAG));
    }
}
