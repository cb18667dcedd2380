//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/boardsync/config.toml)
//! 3. Environment variables (BOARDSYNC_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::stream::StreamConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "BOARDSYNC";

/// Smallest reconnect delay a stream will use
const MIN_RECONNECT_BASE_MS: u64 = 100;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Base URL that relative stream endpoints are resolved against
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// First reconnect delay in milliseconds
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Maximum reconnect delay in milliseconds
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Patch flush tick in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log file (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.server_url = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        // Unparseable numbers keep the current value
        override_millis("RECONNECT_BASE_MS", &mut self.reconnect_base_ms);
        override_millis("RECONNECT_MAX_MS", &mut self.reconnect_max_ms);
        override_millis("FLUSH_INTERVAL_MS", &mut self.flush_interval_ms);
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with BOARDSYNC_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("boardsync")
            .join("config.toml")
    }

    /// Timing settings for streams
    ///
    /// The reconnect base is raised to at least 100ms and the cap to at
    /// least the base, so an unreachable server is never retried in a
    /// tight loop.
    pub fn stream_config(&self) -> StreamConfig {
        let base = self.reconnect_base_ms.max(MIN_RECONNECT_BASE_MS);
        StreamConfig {
            reconnect_base: Duration::from_millis(base),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms.max(base)),
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        }
    }

    /// Set a value by key name, as used by `config set`
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server_url" => self.server_url = value.to_string(),
            "reconnect_base_ms" => self.reconnect_base_ms = parse_delay(key, value)?,
            "reconnect_max_ms" => self.reconnect_max_ms = parse_delay(key, value)?,
            "flush_interval_ms" => self.flush_interval_ms = parse_millis(key, value)?,
            "log_level" => self.log_level = value.to_string(),
            "log_file" => {
                self.log_file = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                }
            }
            _ => anyhow::bail!(
                "Unknown config key: {}. Valid keys: server_url, reconnect_base_ms, \
                 reconnect_max_ms, flush_interval_ms, log_level, log_file",
                key
            ),
        }
        Ok(())
    }
}

fn override_millis(suffix: &str, target: &mut u64) {
    if let Ok(val) = std::env::var(format!("{}_{}", ENV_PREFIX, suffix)) {
        if let Ok(parsed) = val.trim().parse() {
            *target = parsed;
        }
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .with_context(|| format!("{} must be a number of milliseconds, got '{}'", key, value))
}

/// Reconnect delays must be positive
fn parse_delay(key: &str, value: &str) -> Result<u64> {
    let millis = parse_millis(key, value)?;
    if millis == 0 {
        anyhow::bail!("{} must be greater than zero", key);
    }
    Ok(millis)
}

fn default_server_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_reconnect_base_ms() -> u64 {
    1000
}

fn default_reconnect_max_ms() -> u64 {
    8000
}

fn default_flush_interval_ms() -> u64 {
    16
}

fn default_log_level() -> String {
    "info".to_string()
}
