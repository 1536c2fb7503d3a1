//! Engine-wide settings
//!
//! Loaded from an optional TOML file and then overridden by environment
//! variables. Settings feed logging, the default worker pool and the default
//! per-call configuration.

use super::options::MapConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the settings file
pub const CONFIG_PATH_ENV: &str = "FANOUT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Size of the default worker pool; available parallelism when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Starting point for per-call options
    #[serde(default)]
    pub defaults: MapConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            workers: None,
            defaults: MapConfig::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load from `$FANOUT_CONFIG` if set, then apply environment overrides
    pub fn load() -> Result<Self> {
        let mut settings = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };
        settings.merge_env_vars();
        Ok(settings)
    }

    /// Read settings from a TOML file; a missing file yields the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        settings
            .defaults
            .validate()
            .with_context(|| format!("Invalid defaults in {}", path.display()))?;
        Ok(settings)
    }

    pub fn merge_env_vars(&mut self) {
        if let Ok(log_level) = std::env::var("FANOUT_LOG_LEVEL") {
            self.log_level = log_level;
        }

        if let Ok(workers) = std::env::var("FANOUT_WORKERS") {
            if let Ok(value) = workers.parse::<usize>() {
                self.workers = Some(value.max(1));
            }
        }

        if let Ok(batch_size) = std::env::var("FANOUT_BATCH_SIZE") {
            if let Ok(value) = batch_size.parse::<usize>() {
                if value >= 1 {
                    self.defaults.batch_size = value;
                }
            }
        }

        if let Ok(retry_count) = std::env::var("FANOUT_RETRY_COUNT") {
            if let Ok(value) = retry_count.parse::<u32>() {
                self.defaults.retry_count = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fanout.toml");
        std::fs::write(
            &path,
            r#"
log_level = "debug"
workers = 6

[defaults]
batch_size = 16
retry_count = 1
retry_max_delay = "2s"
"#,
        )
        .unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.workers, Some(6));
        assert_eq!(settings.defaults.batch_size, 16);
        assert_eq!(settings.defaults.retry_max_delay, Duration::from_secs(2));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fanout.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse settings"));
    }

    #[test]
    fn test_invalid_defaults_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fanout.toml");
        std::fs::write(&path, "[defaults]\nbatch_size = 0\n").unwrap();

        let err = Settings::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid defaults"));
    }
}
