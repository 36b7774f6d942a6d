//! Application configuration management.
//!
//! Configuration is stored at `~/.config/offsync/config.json` and can be
//! overridden per process with `OFFSYNC_BASE_URL`, `OFFSYNC_DATA_DIR` and
//! `OFFSYNC_OFFLINE`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_REQUEST_TIMEOUT_SECS;
use crate::sync::engine::{DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_REPLAY_TIMEOUT_SECS};
use crate::sync::SyncOptions;

/// Application name used for config/data directory paths
const APP_NAME: &str = "offsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix for resource routes, e.g. `https://api.example.com`.
    pub base_url: Option<String>,
    /// Where the local store keeps its files.
    pub data_dir: Option<PathBuf>,
    pub request_timeout_secs: u64,
    pub replay_timeout_secs: u64,
    pub max_consecutive_failures: u32,
    /// Start with connectivity marked offline.
    pub start_offline: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: None,
            data_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            replay_timeout_secs: DEFAULT_REPLAY_TIMEOUT_SECS,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            start_offline: false,
        }
    }
}

impl Config {
    /// Load the config file (defaults when absent), then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// The config file alone, without environment overrides.
    pub fn load_file() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Write the config file and return where it went.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config: {}", path.display()))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("OFFSYNC_BASE_URL").filter(|v| !v.is_empty()) {
            self.base_url = Some(url);
        }
        if let Some(dir) = var("OFFSYNC_DATA_DIR").filter(|v| !v.is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = var("OFFSYNC_OFFLINE") {
            self.start_offline = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            replay_timeout: Duration::from_secs(self.replay_timeout_secs),
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"base_url":"https://api.test"}"#).unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://api.test"));
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(config.max_consecutive_failures, DEFAULT_MAX_CONSECUTIVE_FAILURES);
        assert!(!config.start_offline);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OFFSYNC_BASE_URL", "https://override.test"),
            ("OFFSYNC_DATA_DIR", "/tmp/offsync-data"),
            ("OFFSYNC_OFFLINE", "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.base_url.as_deref(), Some("https://override.test"));
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/offsync-data"));
        assert!(config.start_offline);
    }

    #[test]
    fn test_save_then_load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(APP_NAME).join(CONFIG_FILE);
        let config = Config {
            base_url: Some("https://api.test".to_string()),
            data_dir: Some(PathBuf::from("/tmp/offsync-store")),
            max_consecutive_failures: 7,
            ..Config::default()
        };

        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_loads_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_sync_options_follow_config() {
        let config = Config {
            replay_timeout_secs: 3,
            max_consecutive_failures: 2,
            ..Config::default()
        };
        let options = config.sync_options();
        assert_eq!(options.replay_timeout, Duration::from_secs(3));
        assert_eq!(options.max_consecutive_failures, 2);
    }
}
