//! Authenticated symmetric encryption of opaque byte payloads.
//!
//! ChaCha20-Poly1305 with a random 12-byte IV drawn per call. The IV is
//! returned next to the ciphertext rather than prefixed to it so the wire
//! form maps onto `{iv, cipherText}` directly.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};

use wlr_proto::EncryptedData;

use crate::error::CryptoError;
use crate::keys::SymmetricKey;
use crate::random::random_bytes;

pub const IV_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;

fn aead_for(key: &SymmetricKey) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()))
}

/// Encrypt `plaintext` under `key` with a fresh IV.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<EncryptedData, CryptoError> {
    let iv: [u8; IV_SIZE] = random_bytes()?;
    let cipher_text = aead_for(key)
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    Ok(EncryptedData {
        iv: iv.to_vec(),
        cipher_text,
    })
}

/// Decrypt and authenticate. Never returns unauthenticated bytes.
pub fn decrypt(key: &SymmetricKey, data: &EncryptedData) -> Result<Vec<u8>, CryptoError> {
    if data.iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidIv {
            expected: IV_SIZE,
            got: data.iv.len(),
        });
    }
    if data.cipher_text.len() < TAG_SIZE {
        return Err(CryptoError::AuthenticationFailed);
    }

    aead_for(key)
        .decrypt(Nonce::from_slice(&data.iv), data.cipher_text.as_slice())
        .map_err(|_| CryptoError::AuthenticationFailed)
}
