//! Structured payloads in and out of encrypted blobs.

use serde::{de::DeserializeOwned, Serialize};

use wlr_proto::EncryptedData;

use crate::cipher::{decrypt, encrypt};
use crate::error::CryptoError;
use crate::keys::SymmetricKey;

/// Serialize `content` to JSON bytes and encrypt them.
pub fn encrypt_content<T: Serialize>(
    content: &T,
    key: &SymmetricKey,
) -> Result<EncryptedData, CryptoError> {
    let bytes =
        serde_json::to_vec(content).map_err(|e| CryptoError::Serialization(e.to_string()))?;
    encrypt(key, &bytes)
}

/// Decrypt and parse. An authentication failure surfaces as
/// `AuthenticationFailed`; a parse failure of authentic bytes as
/// `UnexpectedShape`.
pub fn decrypt_content<T: DeserializeOwned>(
    data: &EncryptedData,
    key: &SymmetricKey,
) -> Result<T, CryptoError> {
    let bytes = decrypt(key, data)?;
    serde_json::from_slice(&bytes).map_err(|e| CryptoError::UnexpectedShape(e.to_string()))
}
