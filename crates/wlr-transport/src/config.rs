//! Bridge connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Relay bridge configuration.
///
/// # Example TOML
///
/// ```toml
/// url = "wss://bridge.example.org/rpc"
/// auto_reconnect = true
/// max_reconnect_attempts = 10
/// base_backoff_ms = 500
/// max_backoff_ms = 30000
/// reply_timeout_ms = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bridge endpoint
    #[serde(default = "default_url")]
    pub url: String,

    /// Reconnect automatically when the channel drops
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How long to wait for the bridge to ack a message
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/rpc".to_string()
}

fn default_auto_reconnect() -> bool {
    true
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_reply_timeout_ms() -> u64 {
    10_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auto_reconnect: default_auto_reconnect(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            reply_timeout_ms: default_reply_timeout_ms(),
        }
    }
}

impl RelayConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }
}

/// Session identity presented to the bridge in `HostSession`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionCredentials {
    pub session_id: String,
    /// Derived from the session secret; never the secret itself.
    pub session_key: String,
}

impl SessionCredentials {
    pub fn new(session_id: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            session_key: session_key.into(),
        }
    }
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}
