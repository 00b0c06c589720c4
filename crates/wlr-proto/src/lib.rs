//! Wire format definitions for the wallet link relay.
//!
//! Every message that crosses the bridge is JSON. Byte fields (IVs,
//! ciphertexts) travel as lower-case hex so that the relay only needs a
//! byte-preserving text channel.

#![forbid(unsafe_code)]

pub mod envelope;
pub mod error;
pub mod relay;
pub mod validation;

pub use envelope::*;
pub use error::{codes, RpcError};

/// Serde adapter for `Vec<u8>` fields carried as hex strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
