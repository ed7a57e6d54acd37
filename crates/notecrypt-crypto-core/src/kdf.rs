//! PBKDF2-HMAC-SHA-256 key derivation for both key modes.
//!
//! This module provides:
//! - [`derive_note_key`]: anonymous mode, per-device secret + random per-note salt
//! - [`derive_master_key`]: master mode, password + [`master_key_domain`]
//! - [`master_key_domain`]: the fixed per-user value used in place of a salt
//!
//! # Master key domain
//!
//! The master-password derivation must reproduce the same key on every device
//! without sharing anything but the password. Its PBKDF2 salt is therefore a
//! public, deterministic function of the user id. It separates users from one
//! another; it is not a secret and it is unrelated to the random per-note salts.

use crate::error::CryptoError;
use crate::memory::SecretBytes;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Default PBKDF2 iteration count for both modes.
pub const DEFAULT_ITERATIONS: u32 = 250_000;

/// Output length of the KDF in bytes (AES-256 key).
pub const KEY_LEN: usize = 32;

/// Minimum salt length accepted for note-key derivation.
const MIN_SALT_LEN: usize = 16;

/// Context tag appended to the anonymous-mode KDF input.
const NOTE_KEY_CONTEXT: &[u8] = b"notecrypt/note-key/v1";

/// Prefix hashed with the user id to build the master key domain.
const MASTER_DOMAIN_PREFIX: &[u8] = b"notecrypt/master-key-domain/v1";

/// A derived AES-256-GCM key, zeroized on drop.
pub type DerivedKey = SecretBytes<KEY_LEN>;

/// Raw PBKDF2-HMAC-SHA-256 with a 32-byte output.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` when `iterations` is zero.
pub fn pbkdf2_sha256(
    input: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<DerivedKey, CryptoError> {
    if iterations == 0 {
        return Err(CryptoError::KeyDerivation("iteration count must be at least 1".into()));
    }
    let mut output = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(input, salt, iterations, &mut output);
    let key = SecretBytes::new(output);
    output.zeroize();
    Ok(key)
}

/// Derive the per-note key in anonymous mode.
///
/// KDF input is `user_id ∥ secret ∥ context tag`; the salt is the random salt
/// carried by the payload being encrypted or decrypted.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` if the salt is shorter than 16 bytes,
/// the secret is empty, or `iterations` is zero.
pub fn derive_note_key(
    user_id: &str,
    secret: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Result<DerivedKey, CryptoError> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "salt too short: {} bytes (minimum {MIN_SALT_LEN})",
            salt.len()
        )));
    }
    if secret.is_empty() {
        return Err(CryptoError::KeyDerivation("empty user secret".into()));
    }

    let capacity = user_id
        .len()
        .saturating_add(secret.len())
        .saturating_add(NOTE_KEY_CONTEXT.len());
    let mut input = Vec::with_capacity(capacity);
    input.extend_from_slice(user_id.as_bytes());
    input.extend_from_slice(secret);
    input.extend_from_slice(NOTE_KEY_CONTEXT);

    let result = pbkdf2_sha256(&input, salt, iterations);
    input.zeroize();
    result
}

/// Fixed per-user value used as the PBKDF2 salt for the master password.
#[must_use]
pub fn master_key_domain(user_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(MASTER_DOMAIN_PREFIX);
    hasher.update(user_id.as_bytes());
    hasher.finalize().into()
}

/// Derive the cross-device master key from a password.
///
/// Deterministic: the same `(password, user_id, iterations)` always yields
/// the same key.
///
/// # Errors
///
/// Returns `CryptoError::KeyDerivation` when `iterations` is zero.
pub fn derive_master_key(
    password: &[u8],
    user_id: &str,
    iterations: u32,
) -> Result<DerivedKey, CryptoError> {
    pbkdf2_sha256(password, &master_key_domain(user_id), iterations)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
