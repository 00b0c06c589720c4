//! Durable session identity shared by every tab of a profile.

use wlr_crypto::{random_hex, sha256_hex};

use crate::errors::StoreError;
use crate::storage::{keys, ScopedStorage};

const SESSION_ID_BYTES: usize = 16;
const SESSION_SECRET_BYTES: usize = 32;

/// Persisted session identity.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub id: String,
    pub secret: String,
    pub linked: bool,
}

impl SessionIdentity {
    /// Credential presented to the bridge; derived so the secret never
    /// leaves the device.
    pub fn key(&self) -> String {
        sha256_hex(format!("{}, {} WalletLink", self.id, self.secret).as_bytes())
    }
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("id", &self.id)
            .field("linked", &self.linked)
            .finish_non_exhaustive()
    }
}

pub struct SessionStore {
    storage: ScopedStorage,
}

impl SessionStore {
    pub fn new(storage: ScopedStorage) -> Self {
        Self { storage }
    }

    /// Stored identity, if both id and secret are present.
    pub fn load(&self) -> Result<Option<SessionIdentity>, StoreError> {
        let id = self.storage.get(keys::SESSION_ID)?;
        let secret = self.storage.get(keys::SESSION_SECRET)?;
        let (Some(id), Some(secret)) = (id, secret) else {
            return Ok(None);
        };
        let linked = self.storage.get(keys::SESSION_LINKED)?.as_deref() == Some("1");
        Ok(Some(SessionIdentity { id, secret, linked }))
    }

    /// Fresh random identity, unlinked, written to storage.
    pub fn create_and_persist(&self) -> Result<SessionIdentity, StoreError> {
        let rng_failed = |_| StoreError::OperationFailed("random generation failed".to_string());
        let identity = SessionIdentity {
            id: random_hex(SESSION_ID_BYTES).map_err(rng_failed)?,
            secret: random_hex(SESSION_SECRET_BYTES).map_err(rng_failed)?,
            linked: false,
        };
        self.storage.set(keys::SESSION_ID, &identity.id)?;
        self.storage.set(keys::SESSION_SECRET, &identity.secret)?;
        self.storage.remove(keys::SESSION_LINKED)?;
        tracing::info!(session_id = %identity.id, "created new session");
        Ok(identity)
    }

    pub fn load_or_create(&self) -> Result<SessionIdentity, StoreError> {
        match self.load()? {
            Some(identity) => {
                tracing::debug!(session_id = %identity.id, linked = identity.linked, "resumed session");
                Ok(identity)
            }
            None => self.create_and_persist(),
        }
    }

    /// Record the link state. Linking is one-way: `false` after `true`
    /// is refused and returns `false`.
    pub fn mark_linked(&self, linked: bool) -> Result<bool, StoreError> {
        let current = self.storage.get(keys::SESSION_LINKED)?.as_deref() == Some("1");
        match (current, linked) {
            (true, false) => {
                tracing::debug!("refusing to unlink a linked session");
                Ok(false)
            }
            (false, true) => {
                self.storage.set(keys::SESSION_LINKED, "1")?;
                Ok(true)
            }
            _ => Ok(true),
        }
    }

    /// Clear the scope only if the stored id is still `expected_id`.
    ///
    /// Another tab may have replaced the session in the meantime; its
    /// state is left alone. The check and the clear are not atomic.
    pub fn clear_if_current(&self, expected_id: &str) -> Result<bool, StoreError> {
        let stored = self.storage.get(keys::SESSION_ID)?;
        if stored.as_deref() != Some(expected_id) {
            tracing::debug!(
                expected = %expected_id,
                stored = ?stored,
                "stored session changed, not clearing"
            );
            return Ok(false);
        }
        self.storage.clear()?;
        Ok(true)
    }
}
