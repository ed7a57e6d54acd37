//! AES-256-GCM field cipher for note payloads.
//!
//! A payload carries one random 16-byte IV and one random 32-byte salt. Every
//! field sealed under that `(key, iv)` gets its own 96-bit GCM nonce:
//!
//! ```text
//! nonce(field) = SHA-256("notecrypt/nonce/v1" ∥ 0 ∥ label(field) ∥ 0 ∥ iv)[..12]
//! aad(field)   = label(field) ∥ salt
//! ```
//!
//! so the title, content and verification ciphertexts never share a nonce,
//! cannot be swapped for one another, and any change to the salt fails
//! authentication even when the key itself does not depend on it.
//!
//! The verification blob has no salt and binds an empty one.
//!
//! Ciphertext layout is `ciphertext ∥ tag (16 bytes)`.

use crate::error::CryptoError;
use crate::kdf::KEY_LEN;
use crate::memory::{random_array, SecretBuffer};
use ring::aead;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Payload IV length in bytes.
pub const IV_LEN: usize = 16;

/// Payload salt length in bytes.
pub const SALT_LEN: usize = 32;

/// AES-256-GCM nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// AES-256-GCM authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

const NONCE_DOMAIN: &[u8] = b"notecrypt/nonce/v1";

/// Random per-payload IV.
pub type Iv = [u8; IV_LEN];

/// Random per-payload salt.
pub type Salt = [u8; SALT_LEN];

/// Which field of a payload is being sealed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Field {
    /// Note title.
    Title,
    /// Note body.
    Content,
    /// Known-plaintext blob used for offline password checks.
    Verification,
}

impl Field {
    const fn label(self) -> &'static [u8] {
        match self {
            Self::Title => b"title",
            Self::Content => b"content",
            Self::Verification => b"verification",
        }
    }

    fn nonce(self, iv: &Iv) -> [u8; NONCE_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(NONCE_DOMAIN);
        hasher.update([0u8]);
        hasher.update(self.label());
        hasher.update([0u8]);
        hasher.update(iv);
        let digest = hasher.finalize();
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&digest[..NONCE_LEN]);
        nonce
    }

    fn aad(self, salt: &[u8]) -> Vec<u8> {
        let label = self.label();
        let mut aad = Vec::with_capacity(label.len().saturating_add(salt.len()));
        aad.extend_from_slice(label);
        aad.extend_from_slice(salt);
        aad
    }
}

/// Fresh random IV from the OS CSPRNG.
///
/// # Errors
///
/// Returns `CryptoError::SecureMemory` if the CSPRNG fails.
pub fn random_iv() -> Result<Iv, CryptoError> {
    random_array()
}

/// Fresh random salt from the OS CSPRNG.
///
/// # Errors
///
/// Returns `CryptoError::SecureMemory` if the CSPRNG fails.
pub fn random_salt() -> Result<Salt, CryptoError> {
    random_array()
}

fn aead_key(key: &[u8]) -> Result<aead::LessSafeKey, CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyMaterial(format!(
            "invalid key length: {} bytes (expected {KEY_LEN})",
            key.len()
        )));
    }
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, key)
        .map_err(|_| CryptoError::InvalidKeyMaterial("failed to create AES-256-GCM key".into()))?;
    Ok(aead::LessSafeKey::new(unbound))
}

/// Seal one field. Returns `ciphertext ∥ tag`.
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` for a key that is not 32 bytes
/// and `CryptoError::Encryption` if sealing fails.
pub fn seal_field(
    key: &[u8],
    iv: &Iv,
    salt: &[u8],
    field: Field,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let sealing_key = aead_key(key)?;
    let nonce = aead::Nonce::assume_unique_for_key(field.nonce(iv));
    let aad = field.aad(salt);

    let mut in_out = Vec::with_capacity(plaintext.len().saturating_add(TAG_LEN));
    in_out.extend_from_slice(plaintext);
    if sealing_key
        .seal_in_place_append_tag(nonce, aead::Aad::from(aad.as_slice()), &mut in_out)
        .is_err()
    {
        in_out.zeroize();
        return Err(CryptoError::Encryption("AES-256-GCM encryption failed".into()));
    }
    Ok(in_out)
}

/// Open one field sealed by [`seal_field`].
///
/// # Errors
///
/// Returns `CryptoError::InvalidKeyMaterial` for a key that is not 32 bytes
/// and `CryptoError::Decryption` when the input is shorter than a tag or
/// fails authentication (wrong key, IV, salt, field, or tampered bytes).
pub fn open_field(
    key: &[u8],
    iv: &Iv,
    salt: &[u8],
    field: Field,
    sealed: &[u8],
) -> Result<SecretBuffer, CryptoError> {
    let opening_key = aead_key(key)?;
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }
    let nonce = aead::Nonce::assume_unique_for_key(field.nonce(iv));
    let aad = field.aad(salt);

    let mut in_out = sealed.to_vec();
    let result = opening_key
        .open_in_place(nonce, aead::Aad::from(aad.as_slice()), &mut in_out)
        .map(|plaintext| SecretBuffer::new(plaintext))
        .map_err(|_| CryptoError::Decryption);
    in_out.zeroize();
    result
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
