//! Daemon configuration loaded from `~/.tabtrail/daemon/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.

use chrono::Duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrackerError};

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".tabtrail/daemon/config.toml";
const DEFAULT_SAVE_DEBOUNCE_MS: u64 = 1_000;
const DEFAULT_MAX_AGE_HOURS: u64 = 24;
const DEFAULT_GC_INTERVAL_SECS: u64 = 60 * 60;
const DEFAULT_ACTIVE_WINDOW_MINS: u64 = 30;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PersistenceConfig {
    pub save_debounce_ms: u64,
    /// Overrides `~/.tabtrail/daemon/state.db`.
    pub db_path: Option<PathBuf>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            save_debounce_ms: DEFAULT_SAVE_DEBOUNCE_MS,
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    pub max_age_hours: u64,
    pub gc_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: DEFAULT_MAX_AGE_HOURS,
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionsConfig {
    pub active_window_mins: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            active_window_mins: DEFAULT_ACTIVE_WINDOW_MINS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackerConfig {
    pub persistence: PersistenceConfig,
    pub retention: RetentionConfig,
    pub sessions: SessionsConfig,
}

impl TrackerConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::milliseconds(clamp_i64(self.persistence.save_debounce_ms))
    }

    pub fn max_age(&self) -> Duration {
        Duration::hours(clamp_i64(self.retention.max_age_hours))
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::seconds(clamp_i64(self.retention.gc_interval_secs.max(1)))
    }

    pub fn active_window(&self) -> Duration {
        Duration::minutes(clamp_i64(self.sessions.active_window_mins))
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(TrackerError::HomeDirNotFound)?;
    Ok(home.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<TrackerConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(TrackerConfig::default());
    }

    let content = fs_err::read_to_string(&config_path)
        .map_err(|err| TrackerError::io("Failed to read tracker config", err))?;
    parse_config(&config_path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<TrackerConfig> {
    toml::from_str::<TrackerConfig>(content).map_err(|err| TrackerError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}

// Keeps absurd config values from overflowing chrono's duration range.
fn clamp_i64(value: u64) -> i64 {
    value.min(i32::MAX as u64) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_config(Some(temp_dir.path().join("missing.toml"))).expect("load");
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.save_debounce(), Duration::seconds(1));
        assert_eq!(config.max_age(), Duration::hours(24));
        assert_eq!(config.gc_interval(), Duration::hours(1));
        assert_eq!(config.active_window(), Duration::minutes(30));
    }

    #[test]
    fn load_config_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(
            &path,
            r#"
[persistence]
save_debounce_ms = 250
db_path = "/tmp/tabtrail.db"

[retention]
max_age_hours = 48
"#,
        )
        .expect("write config");

        let config = load_config(Some(path)).expect("load");
        assert_eq!(config.persistence.save_debounce_ms, 250);
        assert_eq!(
            config.persistence.db_path,
            Some(PathBuf::from("/tmp/tabtrail.db"))
        );
        assert_eq!(config.retention.max_age_hours, 48);
        assert_eq!(config.retention.gc_interval_secs, DEFAULT_GC_INTERVAL_SECS);
        assert_eq!(config.sessions.active_window_mins, DEFAULT_ACTIVE_WINDOW_MINS);
    }

    #[test]
    fn load_config_reports_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("config.toml");
        fs_err::write(&path, "[retention]\nmax_age_hours = \"soon\"\n").expect("write");

        let err = load_config(Some(path)).expect_err("malformed");
        assert!(matches!(err, TrackerError::ConfigMalformed { .. }));
    }
}
