//! Configuration for wlr-demo
//!
//! Stored in TOML. Each section maps onto the configuration type of the
//! crate that consumes it.
//!
//! # Configuration File Locations
//!
//! - Unix: `~/.config/wlr/demo.toml`
//! - Windows: `%APPDATA%\wlr\demo.toml`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use wlr_core::SessionConfig;
use wlr_transport::RelayConfig;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<wlr_core::ConfigError> for ConfigError {
    fn from(e: wlr_core::ConfigError) -> Self {
        ConfigError::ValidationError(e.to_string())
    }
}

/// Demo configuration
///
/// # Example TOML
///
/// ```toml
/// [session]
/// app_name = "wlr-demo"
/// app_chain_ids = [1, 8453]
/// request_timeout_ms = 60000
///
/// [relay]
/// url = "wss://bridge.example.org/rpc"
/// auto_reconnect = true
///
/// [storage]
/// path = ""  # Empty = in-memory only
///
/// [logging]
/// level = "warn"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where session state is kept between runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON file; unset keeps everything in memory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from custom path, else the default location if
    /// a file exists there
    pub fn load_from(custom_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = custom_path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "walletlink", "wlr")
            .map(|dirs| dirs.config_dir().join("demo.toml"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;

        if !self.relay.url.starts_with("ws://") && !self.relay.url.starts_with("wss://") {
            return Err(ConfigError::ValidationError(format!(
                "Invalid relay url '{}'. Expected ws:// or wss://",
                self.relay.url
            )));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log level '{}'. Valid values: {:?}",
                self.logging.level, valid_levels
            )));
        }
        Ok(())
    }

    /// Apply CLI overrides; command-line values win.
    pub fn with_overrides(mut self, overrides: &CliOverrides) -> Self {
        if let Some(debug) = overrides.debug {
            if debug {
                self.logging.level = "debug".to_string();
            }
        }
        if let Some(ref url) = overrides.relay_url {
            self.relay.url = url.clone();
        }
        if let Some(ref path) = overrides.storage_path {
            self.storage.path = Some(path.clone());
        }
        if let Some(timeout) = overrides.request_timeout_ms {
            self.session.request_timeout_ms = Some(timeout);
        }
        self
    }
}

/// CLI configuration overrides
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub debug: Option<bool>,
    pub relay_url: Option<String>,
    pub storage_path: Option<PathBuf>,
    pub request_timeout_ms: Option<u64>,
}
