//! Session configuration.
//!
//! Loaded from TOML. Every field has a default so an empty file is a
//! valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use wlr_crypto::DegenerateSecretPolicy;
use wlr_proto::AppMetadata;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse config file
    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Signer session configuration
///
/// # Example TOML
///
/// ```toml
/// storage_scope = "-walletlink"
/// app_name = "My Dapp"
/// app_chain_ids = [1, 8453]
/// default_chain_id = 1
/// degenerate_secret_policy = "reject"  # "reject" | "allow"
/// request_timeout_ms = 60000           # omit for no timeout
/// destroy_notify_timeout_ms = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Storage namespace shared by every session of the profile
    #[serde(default = "default_storage_scope")]
    pub storage_scope: String,

    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default)]
    pub app_logo_url: Option<String>,

    /// Chains the app supports, announced in the handshake
    #[serde(default = "default_app_chain_ids")]
    pub app_chain_ids: Vec<u64>,

    /// Chain assumed until the wallet reports one
    #[serde(default = "default_chain_id")]
    pub default_chain_id: u64,

    #[serde(default)]
    pub degenerate_secret_policy: DegenerateSecretPolicy,

    /// Upper bound for one request; unset means wait indefinitely
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// How long disconnect waits for the bridge to accept `__destroyed`
    #[serde(default = "default_destroy_notify_timeout_ms")]
    pub destroy_notify_timeout_ms: u64,
}

fn default_storage_scope() -> String {
    "-walletlink".to_string()
}

fn default_app_name() -> String {
    "DApp".to_string()
}

fn default_app_chain_ids() -> Vec<u64> {
    vec![default_chain_id()]
}

fn default_chain_id() -> u64 {
    1
}

fn default_destroy_notify_timeout_ms() -> u64 {
    1_000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_scope: default_storage_scope(),
            app_name: default_app_name(),
            app_logo_url: None,
            app_chain_ids: default_app_chain_ids(),
            default_chain_id: default_chain_id(),
            degenerate_secret_policy: DegenerateSecretPolicy::default(),
            request_timeout_ms: None,
            destroy_notify_timeout_ms: default_destroy_notify_timeout_ms(),
        }
    }
}

impl SessionConfig {
    /// Load from a file, or the defaults when `path` is `None`
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                Self::from_toml_str(&raw)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_scope.is_empty() {
            return Err(ConfigError::ValidationError(
                "storage_scope must not be empty".to_string(),
            ));
        }
        if self.app_chain_ids.is_empty() {
            return Err(ConfigError::ValidationError(
                "app_chain_ids must list at least one chain".to_string(),
            ));
        }
        if self.default_chain_id == 0 {
            return Err(ConfigError::ValidationError(
                "default_chain_id must be non-zero".to_string(),
            ));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "request_timeout_ms must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn destroy_notify_timeout(&self) -> Duration {
        Duration::from_millis(self.destroy_notify_timeout_ms)
    }

    /// Metadata sent with the handshake.
    pub fn app_metadata(&self) -> AppMetadata {
        AppMetadata {
            app_name: self.app_name.clone(),
            app_logo_url: self.app_logo_url.clone(),
            app_chain_ids: self.app_chain_ids.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_is_default() {
        let config = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.degenerate_secret_policy, DegenerateSecretPolicy::Reject);
    }

    #[test]
    fn test_parse_full() {
        let config = SessionConfig::from_toml_str(
            r#"
            storage_scope = "tab"
            app_name = "Test"
            app_chain_ids = [1, 137]
            default_chain_id = 137
            degenerate_secret_policy = "allow"
            request_timeout_ms = 5000
            "#,
        )
        .unwrap();
        assert_eq!(config.app_chain_ids, vec![1, 137]);
        assert_eq!(config.degenerate_secret_policy, DegenerateSecretPolicy::Allow);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(config.app_metadata().app_name, "Test");
    }

    #[test]
    fn test_validation_errors() {
        assert!(SessionConfig::from_toml_str("app_chain_ids = []").is_err());
        assert!(SessionConfig::from_toml_str("request_timeout_ms = 0").is_err());
        assert!(SessionConfig::from_toml_str("storage_scope = \"\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.toml");
        std::fs::write(&path, "app_name = \"FromFile\"").unwrap();
        assert_eq!(SessionConfig::load_from(Some(&path)).unwrap().app_name, "FromFile");
        assert_eq!(SessionConfig::load_from(None).unwrap(), SessionConfig::default());
    }
}
