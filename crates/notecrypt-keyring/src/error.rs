//! Keyring error types for `notecrypt-keyring`.

use notecrypt_crypto_core::CryptoError;
use thiserror::Error;

/// Errors produced by key lifecycle and note cipher operations.
///
/// An incorrect master password is not an error: unlock returns `Ok(false)`.
#[derive(Debug, Error)]
pub enum KeyringError {
    /// Invalid configuration or a required primitive is unavailable.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The operation was invoked without a resolvable user id.
    #[error("missing user identity")]
    MissingIdentity,

    /// A master password is set up but no unlocked master key is available.
    /// Notes can be neither encrypted nor decrypted until the next unlock.
    #[error("master password is locked")]
    Locked,

    /// AES-256-GCM sealing was rejected. Nothing was stored in plaintext.
    #[error("note encryption failed: {0}")]
    Encryption(#[source] CryptoError),

    /// The payload could not be decrypted: wrong key, tampered or malformed
    /// ciphertext, or a mismatched IV/salt.
    #[error("note decryption failed: {0}")]
    Decryption(#[source] CryptoError),

    /// Any other primitive failure (key derivation, CSPRNG).
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Durable key store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A persisted entry exists but cannot be parsed.
    #[error("corrupt persisted state: {0}")]
    CorruptState(String),
}

impl KeyringError {
    /// `true` when the caller should show placeholder content for the note.
    #[must_use]
    pub const fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::Decryption(_))
    }
}

impl From<rusqlite::Error> for KeyringError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
