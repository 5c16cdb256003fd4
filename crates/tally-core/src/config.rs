use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-level configuration, stored at `.tally/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Account scope every local row and queue entry is tagged with.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

/// Tunables for the operation queue and reconciliation layer.
///
/// The retry ceiling and cooldown carry the observed production
/// defaults but are deliberately configuration, not constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Drain attempts before an entry is marked failed-permanently.
    #[serde(default = "default_retry_ceiling")]
    pub retry_ceiling: u32,
    /// Minimum gap between non-forced refreshes, in milliseconds.
    #[serde(default = "default_refresh_cooldown_ms")]
    pub refresh_cooldown_ms: u64,
    /// Capacity of push and event-bus channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: default_retry_ceiling(),
            refresh_cooldown_ms: default_refresh_cooldown_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl SyncConfig {
    /// Cooldown window in microseconds, the unit all timestamps use.
    #[must_use]
    pub const fn refresh_cooldown_us(&self) -> u64 {
        self.refresh_cooldown_ms * 1_000
    }
}

/// Tunables for the local media blob cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Days a cached blob survives without being re-touched.
    #[serde(default = "default_media_ttl_days")]
    pub ttl_days: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ttl_days: default_media_ttl_days(),
        }
    }
}

impl MediaConfig {
    /// Blob time-to-live in microseconds.
    #[must_use]
    pub const fn ttl_us(&self) -> u64 {
        self.ttl_days as u64 * 24 * 60 * 60 * 1_000_000
    }
}

/// User-level configuration (platform config dir), currently just the
/// preferred output mode for the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
}

const fn default_retry_ceiling() -> u32 {
    5
}

const fn default_refresh_cooldown_ms() -> u64 {
    1_500
}

const fn default_channel_capacity() -> usize {
    64
}

const fn default_media_ttl_days() -> u32 {
    30
}

/// Directory holding the local store, lock file, and project config.
pub const STORE_DIR: &str = ".tally";

/// Load `.tally/config.toml` under `root`, falling back to defaults
/// when the file does not exist.
pub fn load_project_config(root: &Path) -> Result<ProjectConfig> {
    let path = root.join(STORE_DIR).join("config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Write `config` to `.tally/config.toml` under `root`.
pub fn save_project_config(root: &Path, config: &ProjectConfig) -> Result<()> {
    let dir = root.join(STORE_DIR);
    std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join("config.toml");
    let raw = toml::to_string_pretty(config).context("serializing config")?;
    std::fs::write(&path, raw).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

/// Path of the user-level config file, if a platform config dir exists.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tally").join("config.toml"))
}

/// Load the user-level config, defaulting when absent or unreadable dirs.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(path) = user_config_path() else {
        return Ok(UserConfig::default());
    };
    if !path.exists() {
        return Ok(UserConfig::default());
    }
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::{ProjectConfig, load_project_config, save_project_config};
    use tempfile::TempDir;

    #[test]
    fn defaults_match_observed_tuning() {
        let config = ProjectConfig::default();
        assert_eq!(config.sync.retry_ceiling, 5);
        assert_eq!(config.sync.refresh_cooldown_ms, 1_500);
        assert_eq!(config.sync.refresh_cooldown_us(), 1_500_000);
        assert_eq!(config.media.ttl_days, 30);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = load_project_config(dir.path()).expect("load");
        assert_eq!(config.sync.retry_ceiling, 5);
    }

    #[test]
    fn roundtrips_through_toml() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = ProjectConfig::default();
        config.sync.retry_ceiling = 3;
        config.sync.refresh_cooldown_ms = 250;
        save_project_config(dir.path(), &config).expect("save");

        let loaded = load_project_config(dir.path()).expect("load");
        assert_eq!(loaded.sync.retry_ceiling, 3);
        assert_eq!(loaded.sync.refresh_cooldown_ms, 250);
        // Unspecified fields keep their serde defaults.
        assert_eq!(loaded.sync.channel_capacity, 64);
    }

    #[test]
    fn partial_toml_uses_field_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let store = dir.path().join(".tally");
        std::fs::create_dir_all(&store).expect("mkdir");
        std::fs::write(store.join("config.toml"), "[sync]\nretry_ceiling = 2\n")
            .expect("write");

        let loaded = load_project_config(dir.path()).expect("load");
        assert_eq!(loaded.sync.retry_ceiling, 2);
        assert_eq!(loaded.sync.refresh_cooldown_ms, 1_500);
    }
}
