//! CipherCodec for the wallet link relay.
//!
//! Stateless operations only: X25519 key agreement, ChaCha20-Poly1305
//! sealing with a random IV per message, hex import/export of keys and
//! serialization of structured payloads into encrypted blobs.

#![forbid(unsafe_code)]

pub mod cipher;
pub mod content;
pub mod error;
pub mod hash;
pub mod keys;
pub mod random;

pub use cipher::{decrypt, encrypt};
pub use content::{decrypt_content, encrypt_content};
pub use error::CryptoError;
pub use keys::{
    derive_shared_secret, export_key_to_hex, generate_key_pair, import_key_from_hex,
    DegenerateSecretPolicy, HexKey, KeyKind, KeyPair, PrivateKey, PublicKey, SymmetricKey,
};
pub use hash::{sha256, sha256_hex};
pub use random::{random_bytes, random_hex, random_id};

#[cfg(test)]
mod proptests;
