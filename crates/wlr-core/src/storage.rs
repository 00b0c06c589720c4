//! Scoped key-value storage shared by every session of a profile.
//!
//! This module defines the `Storage` trait and provides an in-memory
//! implementation (shared between simulated tabs) and a JSON file
//! implementation that survives process restarts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::errors::StoreError;

/// Well-known storage keys.
pub mod keys {
    pub const SESSION_ID: &str = "session:id";
    pub const SESSION_SECRET: &str = "session:secret";
    pub const SESSION_LINKED: &str = "session:linked";
    pub const OWN_PRIVATE_KEY: &str = "ownPrivateKey";
    pub const OWN_PUBLIC_KEY: &str = "ownPublicKey";
    pub const PEER_PUBLIC_KEY: &str = "peerPublicKey";
    /// Last known account list, used to detect an unexpected unlink.
    pub const ADDRESSES: &str = "Addresses";
    pub const ACTIVE_CHAIN: &str = "activeChain";
    pub const WALLET_CHAINS: &str = "walletChains";
    pub const WALLET_CAPABILITIES: &str = "walletCapabilities";
}

/// Opaque string key-value store.
///
/// Writes are visible to every holder of the same backend immediately;
/// there is no locking across holders beyond what the backend provides.
pub trait Storage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, key: &str) -> Result<(), StoreError>;

    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

// ============================================================================
// Scoped view
// ============================================================================

/// View over a backend that prefixes every key with `"{scope}:"`.
#[derive(Clone)]
pub struct ScopedStorage {
    scope: String,
    backend: Arc<dyn Storage>,
}

impl ScopedStorage {
    pub fn new(scope: impl Into<String>, backend: Arc<dyn Storage>) -> Self {
        Self {
            scope: scope.into(),
            backend,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.scope, key)
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.backend.get(&self.full_key(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.backend.set(&self.full_key(key), value)
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove(&self.full_key(key))
    }

    /// Typed read of a JSON value.
    pub fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.set(key, &serde_json::to_string(value)?)
    }

    /// Remove every key inside this scope.
    pub fn clear(&self) -> Result<(), StoreError> {
        let prefix = format!("{}:", self.scope);
        for key in self.backend.keys()? {
            if key.starts_with(&prefix) {
                self.backend.remove(&key)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ScopedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedStorage")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// In-Memory Backend
// ============================================================================

/// In-memory storage backend.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}

// ============================================================================
// File Backend
// ============================================================================

/// JSON file backend. The whole map is rewritten on every mutation.
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open `path`, starting empty when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), entries = entries.len(), "opened file storage");
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
