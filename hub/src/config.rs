// Environment configuration for the hub daemon and viewer
// Resolves state/sync directories and loads user settings from settings.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// File name of the shared project snapshot inside the sync directory
pub const SNAPSHOT_FILE_NAME: &str = "projects-sync.json";

/// Directory and file layout for the hub
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for durable local state (store.json, flags.json, settings.json)
    pub state_dir: PathBuf,
    /// Shared-storage directory that holds the cross-machine snapshot
    pub sync_dir: PathBuf,
    /// Directory holding legacy flat files (projects.json, dev-*.json)
    pub legacy_dir: PathBuf,
    /// Path to the daemon PID file
    pub pid_file: PathBuf,
    /// Unix socket the daemon serves local control requests on
    pub socket_path: PathBuf,
}

impl Config {
    /// Create configuration using default paths
    pub fn default_paths() -> Self {
        let state_dir = Self::default_state_dir();
        Self {
            sync_dir: Self::default_sync_dir(&state_dir),
            legacy_dir: state_dir.clone(),
            pid_file: state_dir.join("daemon.pid"),
            socket_path: state_dir.join("daemon.sock"),
            state_dir,
        }
    }

    /// Create configuration from environment variables, falling back to defaults
    ///
    /// `CLAUDEHUB_DIR` overrides the state, legacy and PID locations;
    /// `CLAUDEHUB_SYNC_DIR` overrides the shared snapshot directory.
    pub fn from_env() -> Self {
        let mut config = match std::env::var("CLAUDEHUB_DIR") {
            Ok(dir) => Self::rooted_at(PathBuf::from(dir)),
            Err(_) => Self::default_paths(),
        };

        if let Ok(sync_dir) = std::env::var("CLAUDEHUB_SYNC_DIR") {
            config.sync_dir = PathBuf::from(sync_dir);
        }

        config
    }

    /// Layout with every directory under one base (tests, overrides)
    pub fn rooted_at(base: PathBuf) -> Self {
        Self {
            sync_dir: base.join("sync"),
            legacy_dir: base.clone(),
            pid_file: base.join("daemon.pid"),
            socket_path: base.join("daemon.sock"),
            state_dir: base,
        }
    }

    fn default_state_dir() -> PathBuf {
        // All platforms: ~/.claudehub/ (or /tmp/claudehub if home unavailable)
        dirs::home_dir()
            .map(|h| h.join(".claudehub"))
            .unwrap_or_else(|| PathBuf::from("/tmp/claudehub"))
    }

    fn default_sync_dir(state_dir: &Path) -> PathBuf {
        #[cfg(target_os = "macos")]
        {
            // iCloud Drive is the shared storage every machine sees
            if let Some(home) = dirs::home_dir() {
                let icloud = home.join("Library/Mobile Documents/com~apple~CloudDocs");
                if icloud.exists() {
                    return icloud.join("ClaudeHub");
                }
            }
        }

        state_dir.join("sync")
    }

    /// Structured registry store
    pub fn store_file(&self) -> PathBuf {
        self.state_dir.join("store.json")
    }

    /// Persisted one-time operation flags
    pub fn flags_file(&self) -> PathBuf {
        self.state_dir.join("flags.json")
    }

    /// User settings
    pub fn settings_file(&self) -> PathBuf {
        self.state_dir.join("settings.json")
    }

    /// Shared cross-machine snapshot
    pub fn snapshot_file(&self) -> PathBuf {
        self.sync_dir.join(SNAPSHOT_FILE_NAME)
    }

    /// Marker file listing externally started sessions awaiting import
    pub fn session_markers_file(&self) -> PathBuf {
        self.state_dir.join("session-markers.json")
    }

    /// Ensure the state and sync directories exist
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.state_dir)?;
        std::fs::create_dir_all(&self.sync_dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.state_dir, std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(())
    }

    /// Write the daemon PID to the PID file
    pub fn write_pid(&self) -> std::io::Result<()> {
        self.ensure_dirs()?;
        std::fs::write(&self.pid_file, std::process::id().to_string())
    }

    /// Read the daemon PID from the PID file
    pub fn read_pid(&self) -> Option<u32> {
        std::fs::read_to_string(&self.pid_file)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// Remove the PID file
    pub fn remove_pid(&self) -> std::io::Result<()> {
        if self.pid_file.exists() {
            std::fs::remove_file(&self.pid_file)
        } else {
            Ok(())
        }
    }

    /// Remove a leftover control socket
    pub fn remove_socket(&self) -> std::io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
        } else {
            Ok(())
        }
    }

    /// Check if a process with the stored PID is still running
    #[cfg(unix)]
    pub fn is_daemon_running(&self) -> bool {
        if let Some(pid) = self.read_pid() {
            // Signal 0 only checks that the process exists
            unsafe { libc::kill(pid as i32, 0) == 0 }
        } else {
            false
        }
    }

    #[cfg(not(unix))]
    pub fn is_daemon_running(&self) -> bool {
        self.read_pid().is_some()
    }
}

/// User-tunable settings stored in settings.json
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    pub notifications: NotificationSettings,
    pub stream: StreamSettings,
    pub reconnect: ReconnectSettings,
    pub dev_project: DevProjectSettings,
    /// Default host address for the viewer (`host:port`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Settings {
    /// Load settings, falling back to defaults when the file is missing or unreadable
    pub fn load(config: &Config) -> Self {
        let path = config.settings_file();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(_) => return Self::default(),
        };

        if contents.trim().is_empty() {
            return Self::default();
        }

        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid settings file, using defaults");
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NotificationSettings {
    /// Master switch for waiting-for-input alerts
    pub enabled: bool,
    /// Only alert while the app is in the background
    pub background_only: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            background_only: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamSettings {
    pub tick_interval_ms: u64,
    /// Consecutive quiet ticks before a pull request fires
    pub fallback_threshold: u32,
    /// Counter value after a pull; controls the slower pull cadence
    pub fallback_resume_at: u32,
    pub sent_ack_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 500,
            fallback_threshold: 10,
            fallback_resume_at: 5,
            sent_ack_ms: 1_200,
            request_timeout_ms: 10_000,
        }
    }
}

impl StreamSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(10))
    }

    pub fn sent_ack(&self) -> Duration {
        Duration::from_millis(self.sent_ack_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconnectSettings {
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            min_interval_ms: 500,
            max_interval_ms: 30_000,
            max_attempts: 8,
        }
    }
}

/// The app's own working copy, always present as a `development` project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DevProjectSettings {
    pub name: String,
    pub icon: String,
    pub path: String,
}

impl Default for DevProjectSettings {
    fn default() -> Self {
        let path = dirs::home_dir()
            .map(|h| h.join("Code").join("claudehub"))
            .unwrap_or_else(|| PathBuf::from("/tmp/claudehub/dev"));
        Self {
            name: "ClaudeHub".to_string(),
            icon: "hammer".to_string(),
            path: path.to_string_lossy().into_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rooted_layout() {
        let config = Config::rooted_at(PathBuf::from("/test/hub"));

        assert_eq!(config.store_file(), PathBuf::from("/test/hub/store.json"));
        assert_eq!(config.flags_file(), PathBuf::from("/test/hub/flags.json"));
        assert_eq!(
            config.snapshot_file(),
            PathBuf::from("/test/hub/sync/projects-sync.json")
        );
        assert_eq!(config.legacy_dir, PathBuf::from("/test/hub"));
        assert_eq!(config.socket_path, PathBuf::from("/test/hub/daemon.sock"));
    }

    #[test]
    fn test_config_from_env() {
        let temp_dir = TempDir::new().unwrap();
        let sync_dir = temp_dir.path().join("shared");
        std::env::set_var("CLAUDEHUB_DIR", temp_dir.path());
        std::env::set_var("CLAUDEHUB_SYNC_DIR", &sync_dir);

        let config = Config::from_env();
        assert_eq!(config.state_dir, temp_dir.path());
        assert_eq!(config.sync_dir, sync_dir);
        assert_eq!(config.pid_file, temp_dir.path().join("daemon.pid"));

        std::env::remove_var("CLAUDEHUB_DIR");
        std::env::remove_var("CLAUDEHUB_SYNC_DIR");
    }

    #[test]
    fn test_pid_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::rooted_at(temp_dir.path().to_path_buf());

        config.write_pid().unwrap();
        assert_eq!(config.read_pid(), Some(std::process::id()));

        config.remove_pid().unwrap();
        assert!(config.read_pid().is_none());
    }

    #[test]
    fn test_settings_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::rooted_at(temp_dir.path().to_path_buf());

        let settings = Settings::load(&config);
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.stream.fallback_threshold, 10);
        assert!(settings.notifications.background_only);
    }

    #[test]
    fn test_settings_partial_file_keeps_other_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::rooted_at(temp_dir.path().to_path_buf());
        std::fs::write(
            config.settings_file(),
            r#"{"notifications":{"enabled":false},"stream":{"tickIntervalMs":250}}"#,
        )
        .unwrap();

        let settings = Settings::load(&config);
        assert!(!settings.notifications.enabled);
        assert!(settings.notifications.background_only);
        assert_eq!(settings.stream.tick_interval(), Duration::from_millis(250));
        assert_eq!(settings.stream.fallback_threshold, 10);
    }

    #[test]
    fn test_settings_invalid_file_falls_back() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::rooted_at(temp_dir.path().to_path_buf());
        std::fs::write(config.settings_file(), "{not json").unwrap();

        assert_eq!(Settings::load(&config), Settings::default());
    }
}
