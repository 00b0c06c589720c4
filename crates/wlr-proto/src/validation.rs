//! Structural validation for envelopes received from the wire.
//!
//! Validation only checks shapes and sizes; authenticity is established
//! by decryption, never here.

use crate::envelope::*;

/// Validation error types for envelopes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Field has invalid size (expected, actual)
    InvalidSize { field: &'static str, expected: usize, actual: usize },
    /// Required field is empty
    EmptyField { field: &'static str },
    /// Field is not lower/upper-case hex
    NotHex { field: &'static str },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSize { field, expected, actual } => {
                write!(f, "field '{}' has invalid size: expected {}, got {}", field, expected, actual)
            }
            Self::EmptyField { field } => write!(f, "required field '{}' is empty", field),
            Self::NotHex { field } => write!(f, "field '{}' is not hex", field),
        }
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Constants for field sizes.
pub mod sizes {
    /// X25519 public key, in hex characters.
    pub const PUBLIC_KEY_HEX_LEN: usize = 64;
    /// Correlation ids are 128-bit.
    pub const CORRELATION_ID_SIZE: usize = 16;
    /// ChaCha20-Poly1305 nonce.
    pub const IV_SIZE: usize = 12;
    /// Poly1305 tag.
    pub const TAG_SIZE: usize = 16;
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Validate a hex-encoded public key as carried in `sender`.
pub fn validate_public_key_hex(field: &'static str, value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    if value.len() != sizes::PUBLIC_KEY_HEX_LEN {
        return Err(ValidationError::InvalidSize {
            field,
            expected: sizes::PUBLIC_KEY_HEX_LEN,
            actual: value.len(),
        });
    }
    if !is_hex(value) {
        return Err(ValidationError::NotHex { field });
    }
    Ok(())
}

fn validate_id(field: &'static str, value: &str) -> ValidationResult<()> {
    if value.is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    if !is_hex(value) {
        return Err(ValidationError::NotHex { field });
    }
    Ok(())
}

fn validate_encrypted(data: &EncryptedData) -> ValidationResult<()> {
    if data.iv.len() != sizes::IV_SIZE {
        return Err(ValidationError::InvalidSize {
            field: "content.encrypted.iv",
            expected: sizes::IV_SIZE,
            actual: data.iv.len(),
        });
    }
    if data.cipher_text.is_empty() {
        return Err(ValidationError::EmptyField { field: "content.encrypted.cipherText" });
    }
    Ok(())
}

pub fn validate_request_envelope(env: &RequestEnvelope) -> ValidationResult<()> {
    validate_id("id", &env.id)?;
    validate_public_key_hex("sender", &env.sender)?;
    match &env.content {
        RequestContent::Handshake(h) => {
            if h.method.is_empty() {
                return Err(ValidationError::EmptyField { field: "content.handshake.method" });
            }
            Ok(())
        }
        RequestContent::Encrypted(data) => validate_encrypted(data),
    }
}

/// Failures may come from a counterpart that never learned our key, so
/// `sender` is only checked for encrypted responses.
pub fn validate_response_envelope(env: &ResponseEnvelope) -> ValidationResult<()> {
    validate_id("requestId", &env.request_id)?;
    match &env.content {
        ResponseContent::Encrypted(data) => {
            validate_public_key_hex("sender", &env.sender)?;
            validate_encrypted(data)
        }
        ResponseContent::Failure(_) => Ok(()),
    }
}
