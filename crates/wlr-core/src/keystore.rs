//! Local key pair, peer public key and the derived shared secret.
//!
//! Key material is persisted by role so a reloaded session can resume
//! without a new handshake. The shared secret itself is never persisted;
//! it is re-derived from the two halves on demand.

use parking_lot::Mutex;

use wlr_crypto::{
    derive_shared_secret, export_key_to_hex, generate_key_pair, import_key_from_hex,
    CryptoError, DegenerateSecretPolicy, KeyPair, PrivateKey, PublicKey, SymmetricKey,
};

use crate::errors::{KeyStoreError, StoreError};
use crate::storage::{keys, ScopedStorage};

#[derive(Default)]
struct KeyMaterial {
    own: Option<KeyPair>,
    peer: Option<PublicKey>,
    /// Present only when `own` and `peer` are.
    secret: Option<SymmetricKey>,
}

enum KeyState {
    /// Storage has not been read yet.
    Unloaded,
    Loaded(KeyMaterial),
    /// Wiped; the next access generates fresh keys without reading storage.
    Cleared,
}

/// Persisted key material for one session scope.
pub struct KeyStore {
    storage: ScopedStorage,
    policy: DegenerateSecretPolicy,
    state: Mutex<KeyState>,
}

impl KeyStore {
    pub fn new(storage: ScopedStorage, policy: DegenerateSecretPolicy) -> Self {
        Self {
            storage,
            policy,
            state: Mutex::new(KeyState::Unloaded),
        }
    }

    /// Own public key, generating and persisting a key pair on first use.
    pub fn own_public_key(&self) -> Result<PublicKey, KeyStoreError> {
        let mut state = self.state.lock();
        let material = self.material(&mut state)?;
        if let Some(own) = &material.own {
            return Ok(own.public);
        }

        let pair = generate_key_pair();
        self.storage
            .set(keys::OWN_PRIVATE_KEY, &export_key_to_hex(&pair.private))?;
        self.storage
            .set(keys::OWN_PUBLIC_KEY, &export_key_to_hex(&pair.public))?;
        tracing::debug!(public_key = %export_key_to_hex(&pair.public), "generated local key pair");

        let public = pair.public;
        material.own = Some(pair);
        Ok(public)
    }

    pub fn peer_public_key(&self) -> Result<Option<PublicKey>, KeyStoreError> {
        let mut state = self.state.lock();
        Ok(self.material(&mut state)?.peer)
    }

    /// Shared secret, if both halves are known.
    pub fn shared_secret(&self) -> Result<Option<SymmetricKey>, KeyStoreError> {
        let mut state = self.state.lock();
        let policy = self.policy;
        let material = self.material(&mut state)?;

        if let Some(secret) = &material.secret {
            return Ok(Some(secret.clone()));
        }
        let (Some(own), Some(peer)) = (&material.own, &material.peer) else {
            return Ok(None);
        };

        let secret = derive_shared_secret(&own.private, peer, policy)
            .map_err(KeyStoreError::Derivation)?;
        material.secret = Some(secret.clone());
        Ok(Some(secret))
    }

    pub fn has_shared_secret(&self) -> bool {
        matches!(self.shared_secret(), Ok(Some(_)))
    }

    /// Store the counterpart's key and re-derive the secret. A later
    /// handshake always overwrites an earlier peer key.
    ///
    /// When derivation fails the peer key is not retained.
    pub fn set_peer_public_key(&self, peer: PublicKey) -> Result<(), KeyStoreError> {
        // Make sure a local pair exists before taking the lock again.
        self.own_public_key()?;

        let mut state = self.state.lock();
        let policy = self.policy;
        let material = self.material(&mut state)?;

        material.secret = None;
        let derived = match &material.own {
            Some(own) => derive_shared_secret(&own.private, &peer, policy),
            None => return Err(KeyStoreError::Derivation(CryptoError::KeyDerivation)),
        };

        match derived {
            Ok(secret) => {
                self.storage
                    .set(keys::PEER_PUBLIC_KEY, &export_key_to_hex(&peer))?;
                material.peer = Some(peer);
                material.secret = Some(secret);
                tracing::debug!(peer = %export_key_to_hex(&peer), "peer public key set");
                Ok(())
            }
            Err(e) => {
                self.storage.remove(keys::PEER_PUBLIC_KEY)?;
                material.peer = None;
                tracing::warn!(error = %e, "rejected peer public key");
                Err(KeyStoreError::Derivation(e))
            }
        }
    }

    /// Drop the peer key and secret, keeping the local pair.
    pub fn forget_peer(&self) -> Result<(), KeyStoreError> {
        let mut state = self.state.lock();
        self.storage.remove(keys::PEER_PUBLIC_KEY)?;
        if let KeyState::Loaded(material) = &mut *state {
            material.peer = None;
            material.secret = None;
        }
        Ok(())
    }

    /// Wipe everything in memory and in storage.
    pub fn clear(&self) -> Result<(), KeyStoreError> {
        let mut state = self.state.lock();
        // Memory is wiped even if a storage removal below fails.
        *state = KeyState::Cleared;
        self.storage.remove(keys::OWN_PRIVATE_KEY)?;
        self.storage.remove(keys::OWN_PUBLIC_KEY)?;
        self.storage.remove(keys::PEER_PUBLIC_KEY)?;
        tracing::debug!("key store cleared");
        Ok(())
    }

    /// Forget in-memory material only; storage is left to whoever owns it now.
    pub fn discard(&self) {
        *self.state.lock() = KeyState::Cleared;
    }

    fn material<'a>(&self, state: &'a mut KeyState) -> Result<&'a mut KeyMaterial, KeyStoreError> {
        match state {
            KeyState::Unloaded => *state = KeyState::Loaded(self.load()?),
            KeyState::Cleared => *state = KeyState::Loaded(KeyMaterial::default()),
            KeyState::Loaded(_) => {}
        }
        match state {
            KeyState::Loaded(material) => Ok(material),
            KeyState::Unloaded | KeyState::Cleared => Err(KeyStoreError::Storage(
                StoreError::OperationFailed("key material not loaded".to_string()),
            )),
        }
    }

    fn load(&self) -> Result<KeyMaterial, KeyStoreError> {
        let own = match self.storage.get(keys::OWN_PRIVATE_KEY)? {
            Some(hex) => {
                let private: PrivateKey =
                    import_key_from_hex(&hex).map_err(|source| KeyStoreError::Corrupted {
                        role: "own private",
                        source,
                    })?;
                let public = private.public_key();
                Some(KeyPair { private, public })
            }
            None => None,
        };

        let peer = match self.storage.get(keys::PEER_PUBLIC_KEY)? {
            Some(hex) => Some(import_key_from_hex::<PublicKey>(&hex).map_err(|source| {
                KeyStoreError::Corrupted {
                    role: "peer public",
                    source,
                }
            })?),
            None => None,
        };

        tracing::debug!(
            has_own = own.is_some(),
            has_peer = peer.is_some(),
            "loaded key material"
        );
        Ok(KeyMaterial {
            own,
            peer,
            secret: None,
        })
    }
}
