//! Configuration resolution for Backhaul.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/backhaul/settings.toml)
//! 3. Environment variables
//! 4. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete Backhaul configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub agents: AgentConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

/// Daemon-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub database_path: Option<PathBuf>,
    /// Path to the installation-scoped credential sealing key.
    pub key_path: Option<PathBuf>,
    pub log_level: String,
    /// Transfer tool binary invoked by the local executor.
    pub transfer_bin: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            key_path: None,
            log_level: "info".to_string(),
            transfer_bin: "rclone".to_string(),
        }
    }
}

/// Scheduling and watchdog cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval between due-config evaluation ticks (seconds).
    pub tick_interval_secs: u64,
    /// Interval between stuck-job sweeps (seconds).
    pub sweep_interval_secs: u64,
    /// A running job with no progress report for this long is stuck (seconds).
    pub stuck_threshold_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            sweep_interval_secs: 60,
            stuck_threshold_secs: 300,
        }
    }
}

/// Agent registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// An agent is online iff its last check-in is within this window (seconds).
    pub liveness_window_secs: i64,
    /// Enrollment token time-to-live (seconds).
    pub token_ttl_secs: i64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            liveness_window_secs: 30,
            token_ttl_secs: 3600,
        }
    }
}

/// Retention pruning behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Attempts per pruning pass before giving up until the next success.
    pub max_attempts: u32,
    /// Base delay between attempts (seconds), doubled each retry.
    pub retry_delay_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 10,
        }
    }
}

/// Load configuration with hierarchical resolution.
///
/// An explicit `path` replaces the global file and must exist; with
/// `None` the global file is read when present and skipped otherwise.
pub fn load_config_from(path: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    match path {
        Some(explicit) => {
            if !explicit.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    explicit.display()
                )));
            }
            config = load_config_file(explicit)?;
        }
        None => {
            if let Some(global_path) = global_config_path() {
                if global_path.exists() {
                    config = load_config_file(&global_path)?;
                }
            }
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("settings.toml"))
}

/// Default database path under the config directory.
pub fn default_database_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("backhaul.db"))
}

/// Default sealing key path under the config directory.
pub fn default_key_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join("sealing.key"))
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".backhaul"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/backhaul"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".config"))
            })
            .map(|p| p.join("backhaul"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    toml::from_str(&content).map_err(|e| {
        Error::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("BACKHAUL_DB_PATH") {
        config.daemon.database_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("BACKHAUL_KEY_PATH") {
        config.daemon.key_path = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("BACKHAUL_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Ok(val) = std::env::var("BACKHAUL_TRANSFER_BIN") {
        config.daemon.transfer_bin = val;
    }
    if let Ok(val) = std::env::var("BACKHAUL_TICK_INTERVAL") {
        if let Ok(n) = val.parse() {
            config.scheduler.tick_interval_secs = n;
        }
    }
    if let Ok(val) = std::env::var("BACKHAUL_STUCK_THRESHOLD") {
        if let Ok(n) = val.parse() {
            config.scheduler.stuck_threshold_secs = n;
        }
    }
    if let Ok(val) = std::env::var("BACKHAUL_LIVENESS_WINDOW") {
        if let Ok(n) = val.parse() {
            config.agents.liveness_window_secs = n;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_subminute_liveness_window() {
        let config = Config::default();
        assert!(config.agents.liveness_window_secs <= 60);
    }

    #[test]
    fn defaults_token_ttl_is_one_hour() {
        let config = Config::default();
        assert_eq!(config.agents.token_ttl_secs, 3600);
    }

    #[test]
    fn explicit_config_path_must_exist() {
        assert!(load_config_from(Some(Path::new("/nonexistent/settings.toml"))).is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [scheduler]
            tick_interval_secs = 30
            sweep_interval_secs = 60
            stuck_threshold_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 30);
        assert_eq!(config.agents.liveness_window_secs, 30);
    }
}
