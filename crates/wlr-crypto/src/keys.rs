//! Key types, X25519 key agreement and hex encoding.
//!
//! The shared secret is the X25519 output run through HKDF-SHA256, so both
//! parties land on the same 32-byte ChaCha20-Poly1305 key:
//! `derive(a.private, b.public) == derive(b.private, a.public)`.

use constant_time_eq::constant_time_eq;
use hkdf::Hkdf;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

const KEY_LEN: usize = 32;
const SHARED_KEY_SALT: &[u8] = b"wlr_shared_key_salt_v1";
const SHARED_KEY_INFO: &[u8] = b"wlr_shared_key_v1";

/// Which role a key plays; used for error reporting and storage naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Private,
    Public,
    Symmetric,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Private => write!(f, "private"),
            KeyKind::Public => write!(f, "public"),
            KeyKind::Symmetric => write!(f, "symmetric"),
        }
    }
}

/// What to do when X25519 yields the all-zero output (low-order peer key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegenerateSecretPolicy {
    /// Treat a non-contributory result as a derivation error.
    #[default]
    Reject,
    /// Accept it and derive a key anyway.
    Allow,
}

/// X25519 private key.
#[derive(Clone)]
pub struct PrivateKey(StaticSecret);

/// X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(X25519PublicKey);

/// 32-byte ChaCha20-Poly1305 key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LEN]);

impl PrivateKey {
    pub fn public_key(&self) -> PublicKey {
        PublicKey(X25519PublicKey::from(&self.0))
    }
}

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        self.0.as_bytes()
    }
}

impl SymmetricKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.0, &other.0)
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.as_bytes()))
    }
}

/// A local key pair.
#[derive(Clone, Debug)]
pub struct KeyPair {
    pub private: PrivateKey,
    pub public: PublicKey,
}

/// Generate a fresh X25519 key pair from the OS RNG.
pub fn generate_key_pair() -> KeyPair {
    let private = PrivateKey(StaticSecret::random_from_rng(OsRng));
    let public = private.public_key();
    KeyPair { private, public }
}

/// Derive the symmetric key shared with the holder of `peer_public`.
pub fn derive_shared_secret(
    own_private: &PrivateKey,
    peer_public: &PublicKey,
    policy: DegenerateSecretPolicy,
) -> Result<SymmetricKey, CryptoError> {
    let shared = own_private.0.diffie_hellman(&peer_public.0);
    if !shared.was_contributory() && policy == DegenerateSecretPolicy::Reject {
        return Err(CryptoError::NonContributory);
    }

    let hk = Hkdf::<Sha256>::new(Some(SHARED_KEY_SALT), shared.as_bytes());
    let mut key = [0u8; KEY_LEN];
    hk.expand(SHARED_KEY_INFO, &mut key)
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(SymmetricKey(key))
}

/// Keys with a canonical 32-byte hex form.
pub trait HexKey: Sized {
    const KIND: KeyKind;

    fn to_key_bytes(&self) -> [u8; KEY_LEN];

    fn from_key_bytes(bytes: [u8; KEY_LEN]) -> Self;
}

impl HexKey for PrivateKey {
    const KIND: KeyKind = KeyKind::Private;

    fn to_key_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    fn from_key_bytes(bytes: [u8; KEY_LEN]) -> Self {
        PrivateKey(StaticSecret::from(bytes))
    }
}

impl HexKey for PublicKey {
    const KIND: KeyKind = KeyKind::Public;

    fn to_key_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    fn from_key_bytes(bytes: [u8; KEY_LEN]) -> Self {
        PublicKey(X25519PublicKey::from(bytes))
    }
}

impl HexKey for SymmetricKey {
    const KIND: KeyKind = KeyKind::Symmetric;

    fn to_key_bytes(&self) -> [u8; KEY_LEN] {
        self.0
    }

    fn from_key_bytes(bytes: [u8; KEY_LEN]) -> Self {
        SymmetricKey(bytes)
    }
}

/// Lower-case hex of the raw key bytes (64 chars).
pub fn export_key_to_hex<K: HexKey>(key: &K) -> String {
    let mut bytes = key.to_key_bytes();
    let out = hex::encode(bytes);
    bytes.zeroize();
    out
}

/// Parse a key of type `K` from hex; an optional `0x` prefix is accepted.
pub fn import_key_from_hex<K: HexKey>(encoded: &str) -> Result<K, CryptoError> {
    let trimmed = encoded.strip_prefix("0x").unwrap_or(encoded);
    let mut bytes = hex::decode(trimmed).map_err(|_| CryptoError::InvalidHex(K::KIND))?;
    if bytes.len() != KEY_LEN {
        let got = bytes.len();
        bytes.zeroize();
        return Err(CryptoError::InvalidKeyLength {
            kind: K::KIND,
            expected: KEY_LEN,
            got,
        });
    }
    let mut arr = [0u8; KEY_LEN];
    arr.copy_from_slice(&bytes);
    bytes.zeroize();
    let key = K::from_key_bytes(arr);
    arr.zeroize();
    Ok(key)
}
