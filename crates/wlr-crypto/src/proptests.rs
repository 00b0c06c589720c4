
#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::cipher::{decrypt, encrypt};
    use crate::keys::{
        derive_shared_secret, export_key_to_hex, import_key_from_hex, DegenerateSecretPolicy,
        HexKey, PrivateKey, PublicKey, SymmetricKey,
    };

    proptest! {
        // Both parties derive the same key from their own private half.
        #[test]
        fn test_shared_secret_commutativity(
            a_seed in any::<[u8; 32]>(),
            b_seed in any::<[u8; 32]>()
        ) {
            let a = PrivateKey::from_key_bytes(a_seed);
            let b = PrivateKey::from_key_bytes(b_seed);

            let ab = derive_shared_secret(&a, &b.public_key(), DegenerateSecretPolicy::Allow).unwrap();
            let ba = derive_shared_secret(&b, &a.public_key(), DegenerateSecretPolicy::Allow).unwrap();
            prop_assert_eq!(ab, ba);
        }

        #[test]
        fn test_encrypt_round_trip(
            key in any::<[u8; 32]>(),
            plaintext in any::<Vec<u8>>()
        ) {
            let k = SymmetricKey::from_key_bytes(key);
            let sealed = encrypt(&k, &plaintext).unwrap();
            prop_assert_eq!(decrypt(&k, &sealed).unwrap(), plaintext);
        }

        // A different key never opens the blob.
        #[test]
        fn test_wrong_key_never_decrypts(
            key in any::<[u8; 32]>(),
            other in any::<[u8; 32]>(),
            plaintext in any::<Vec<u8>>()
        ) {
            prop_assume!(key != other);
            let sealed = encrypt(&SymmetricKey::from_key_bytes(key), &plaintext).unwrap();
            prop_assert!(decrypt(&SymmetricKey::from_key_bytes(other), &sealed).is_err());
        }

        #[test]
        fn test_public_key_hex_is_canonical(bytes in any::<[u8; 32]>()) {
            let key = PublicKey::from_key_bytes(bytes);
            let encoded = export_key_to_hex(&key);
            prop_assert_eq!(encoded.len(), 64);
            prop_assert_eq!(encoded.to_lowercase(), encoded.clone());
            let decoded: PublicKey = import_key_from_hex(&encoded).unwrap();
            prop_assert_eq!(decoded, key);
        }
    }
}
