//! `notecrypt-crypto-core`: Pure cryptographic primitives for notecrypt.
//!
//! This crate is the audit target: zero storage, zero logging, zero threads.
//! Everything that touches persisted state lives in `notecrypt-keyring`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod error;
pub mod memory;

pub mod cipher;
pub mod encoding;
pub mod kdf;

pub use cipher::{open_field, random_iv, random_salt, seal_field, Field, Iv, Salt, IV_LEN, SALT_LEN};
pub use error::CryptoError;
pub use kdf::{
    derive_master_key, derive_note_key, master_key_domain, DerivedKey, DEFAULT_ITERATIONS, KEY_LEN,
};
pub use memory::{check_csprng, SecretBuffer, SecretBytes};
