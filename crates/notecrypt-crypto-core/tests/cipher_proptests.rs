#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

//! Property-based tests for the AES-256-GCM field cipher.

use notecrypt_crypto_core::cipher::{open_field, seal_field, Field, IV_LEN, SALT_LEN, TAG_LEN};
use notecrypt_crypto_core::CryptoError;
use proptest::prelude::*;

const PROP_KEY: [u8; 32] = [0xCC; 32];

fn any_field() -> impl Strategy<Value = Field> {
    prop_oneof![
        Just(Field::Title),
        Just(Field::Content),
        Just(Field::Verification),
    ]
}

proptest! {
    /// Seal→open recovers the plaintext for any IV, salt and field.
    #[test]
    fn seal_open_roundtrip(
        plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
        iv in any::<[u8; IV_LEN]>(),
        salt in any::<[u8; SALT_LEN]>(),
        field in any_field(),
    ) {
        let sealed = seal_field(&PROP_KEY, &iv, &salt, field, &plaintext).unwrap();
        prop_assert_eq!(sealed.len(), plaintext.len() + TAG_LEN);
        let opened = open_field(&PROP_KEY, &iv, &salt, field, &sealed).unwrap();
        prop_assert_eq!(opened.expose(), plaintext.as_slice());
    }

    /// Flipping any single byte of the sealed output fails authentication.
    #[test]
    fn any_flipped_byte_is_detected(
        plaintext in proptest::collection::vec(any::<u8>(), 1..256),
        iv in any::<[u8; IV_LEN]>(),
        salt in any::<[u8; SALT_LEN]>(),
        index in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let mut sealed = seal_field(&PROP_KEY, &iv, &salt, Field::Content, &plaintext).unwrap();
        let at = index.index(sealed.len());
        sealed[at] ^= mask;
        let result = open_field(&PROP_KEY, &iv, &salt, Field::Content, &sealed);
        prop_assert!(matches!(result, Err(CryptoError::Decryption)));
    }
}
