//! OS randomness for IVs, correlation ids and session identifiers.

use crate::error::CryptoError;

/// Size of a correlation id in bytes (128-bit).
pub const ID_SIZE: usize = 16;

pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out).map_err(|_| CryptoError::Rng)?;
    Ok(out)
}

/// `len` random bytes, hex encoded.
pub fn random_hex(len: usize) -> Result<String, CryptoError> {
    let mut out = vec![0u8; len];
    getrandom::getrandom(&mut out).map_err(|_| CryptoError::Rng)?;
    Ok(hex::encode(out))
}

/// Fresh 128-bit correlation id.
pub fn random_id() -> Result<String, CryptoError> {
    random_hex(ID_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_and_sized() {
        let ids: HashSet<String> = (0..1000).map(|_| random_id().unwrap()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.len() == ID_SIZE * 2));
    }
}
