//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the
//! backend location, the session-layer endpoints and the startup restore
//! budget.
//!
//! Configuration is stored at `~/.config/tuitter/config.json`. Environment
//! variables override the file after it is loaded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/data directory paths
pub const APP_NAME: &str = "tuitter";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend used when neither the config file nor `BACKEND_URL` names one.
const DEFAULT_BASE_URL: &str = "https://voqbyhcnqe.execute-api.us-east-2.amazonaws.com";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Wall-clock budget for the startup restore loop.
const DEFAULT_RESTORE_BUDGET_MS: u64 = 2000;

/// Pause between startup restore attempts.
const DEFAULT_RESTORE_BACKOFF_MS: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Cheapest authenticated GET, used to validate a restored token.
    pub probe_path: String,
    pub refresh_path: String,
    /// The backend answers 400 for stale tokens on some routes.
    pub bad_request_is_auth_failure: bool,
    pub restore_budget_ms: u64,
    pub restore_backoff_ms: u64,
    /// External helper that runs the browser sign-in and prints credentials JSON.
    pub auth_command: Option<String>,
    pub last_handle: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            probe_path: "/me".to_string(),
            refresh_path: "/auth/refresh".to_string(),
            bad_request_is_auth_failure: true,
            restore_budget_ms: DEFAULT_RESTORE_BUDGET_MS,
            restore_backoff_ms: DEFAULT_RESTORE_BACKOFF_MS,
            auth_command: None,
            last_handle: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_in(&Self::config_dir()?)
    }

    /// Write `config.json` into `dir`, creating it if needed.
    pub fn save_in(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), contents)?;
        Ok(())
    }

    /// Apply `BACKEND_URL` and `TUITTER_AUTH_COMMAND` from the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("BACKEND_URL").filter(|v| !v.trim().is_empty()) {
            self.base_url = url;
        }
        if let Some(cmd) = lookup("TUITTER_AUTH_COMMAND").filter(|v| !v.trim().is_empty()) {
            self.auth_command = Some(cmd);
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn restore_budget(&self) -> Duration {
        Duration::from_millis(self.restore_budget_ms)
    }

    pub fn restore_backoff(&self) -> Duration {
        Duration::from_millis(self.restore_backoff_ms)
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Directory holding the config file and the on-disk credential fallback.
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    /// Directory for the debug log file.
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_file_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"base_url": "http://localhost:8000"}"#).unwrap();
        assert_eq!(config.base_url, "http://localhost:8000");
        assert_eq!(config.probe_path, "/me");
        assert!(config.bad_request_is_auth_failure);
        assert_eq!(config.restore_budget(), Duration::from_secs(2));
        assert_eq!(config.restore_backoff(), Duration::from_millis(100));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|key| match key {
            "BACKEND_URL" => Some("http://127.0.0.1:9000".to_string()),
            "TUITTER_AUTH_COMMAND" => Some("tuitter-login --json".to_string()),
            _ => None,
        });
        assert_eq!(config.base_url, "http://127.0.0.1:9000");
        assert_eq!(config.auth_command.as_deref(), Some("tuitter-login --json"));
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env_overrides(|_| Some("   ".to_string()));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert!(config.auth_command.is_none());
    }
}
