use crate::keys::KeyKind;

/// Error type for CipherCodec operations.
///
/// Authentication failures and shape failures are separate variants so
/// callers can tell "wrong key or tampered" from "decrypted fine but not
/// what we expected".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid {kind} key length: expected {expected}, got {got}")]
    InvalidKeyLength { kind: KeyKind, expected: usize, got: usize },
    #[error("invalid hex encoding for {0} key")]
    InvalidHex(KeyKind),
    #[error("key agreement produced a non-contributory (all-zero) secret")]
    NonContributory,
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("invalid iv: expected {expected} bytes, got {got}")]
    InvalidIv { expected: usize, got: usize },
    #[error("authentication failed: wrong key or tampered ciphertext")]
    AuthenticationFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decrypted payload has unexpected shape: {0}")]
    UnexpectedShape(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("RNG failed")]
    Rng,
}
