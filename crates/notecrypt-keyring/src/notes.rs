//! Note Cipher: seals and opens the title/content of one note.

use std::sync::Arc;

use notecrypt_crypto_core::{
    encoding, open_field, random_iv, random_salt, seal_field, CryptoError, Field, IV_LEN,
    SALT_LEN,
};

use crate::cache::{CacheKey, DecryptCache};
use crate::error::KeyringError;
use crate::identity::UserId;
use crate::master::MasterPasswordManager;
use crate::payload::{DecryptedNote, EncryptedNotePayload};
use crate::provider::{KeyMode, KeyProvider};

/// Encrypts notes under the user's current key and decrypts them through the
/// decrypt cache.
#[derive(Debug)]
pub struct NoteCipher {
    provider: Arc<KeyProvider>,
    master: Arc<MasterPasswordManager>,
    cache: Arc<DecryptCache>,
}

impl NoteCipher {
    /// Cipher sharing the service's provider, manager and cache.
    #[must_use]
    pub const fn new(
        provider: Arc<KeyProvider>,
        master: Arc<MasterPasswordManager>,
        cache: Arc<DecryptCache>,
    ) -> Self {
        Self {
            provider,
            master,
            cache,
        }
    }

    /// Encrypt `(title, content)` with a fresh IV and salt.
    ///
    /// In master mode the first successful encryption also stores the
    /// user's verification blob.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::Encryption`] if sealing fails
    /// - [`KeyringError::Storage`] / [`KeyringError::CorruptState`] if key
    ///   material cannot be resolved
    /// - [`KeyringError::Locked`] while the master password is locked
    pub fn encrypt(
        &self,
        user: &UserId,
        title: &str,
        content: &str,
    ) -> Result<EncryptedNotePayload, KeyringError> {
        let iv = random_iv()?;
        let salt = random_salt()?;
        let (mode, key) = self.provider.derive_key(user, &salt)?;

        let seal = |field, plaintext: &str| {
            seal_field(key.expose(), &iv, &salt, field, plaintext.as_bytes()).map_err(|e| {
                tracing::error!(user = %user.redacted(), error = %e, "note encryption failed");
                KeyringError::Encryption(e)
            })
        };
        let encrypted_title = seal(Field::Title, title)?;
        let encrypted_content = seal(Field::Content, content)?;

        if mode == KeyMode::Master {
            self.master.ensure_verification_blob(user, &key, &iv)?;
        }

        Ok(EncryptedNotePayload {
            encrypted_title: encoding::encode(&encrypted_title),
            encrypted_content: encoding::encode(&encrypted_content),
            iv: encoding::encode(&iv),
            salt: encoding::encode(&salt),
        })
    }

    /// Decrypt `payload` for `user`, serving repeat requests from the cache.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::Decryption`] for a wrong key, tampered or malformed
    ///   fields, or ciphertext that is not UTF-8
    /// - [`KeyringError::Storage`] / [`KeyringError::CorruptState`] if key
    ///   material cannot be resolved
    /// - [`KeyringError::Locked`] while the master password is locked
    pub fn decrypt(
        &self,
        user: &UserId,
        payload: &EncryptedNotePayload,
    ) -> Result<DecryptedNote, KeyringError> {
        let cache_key = CacheKey::new(user, payload);
        if let Some(hit) = self.cache.get(&cache_key) {
            tracing::debug!(user = %user.redacted(), "decrypt cache hit");
            return Ok(hit);
        }
        tracing::debug!(user = %user.redacted(), "decrypt cache miss");

        let note = self.open(user, payload).inspect_err(|e| {
            if e.is_decryption_failure() {
                tracing::warn!(user = %user.redacted(), error = %e, "note decryption failed");
            }
        })?;
        self.cache.insert(cache_key, note.clone());
        Ok(note)
    }

    fn open(
        &self,
        user: &UserId,
        payload: &EncryptedNotePayload,
    ) -> Result<DecryptedNote, KeyringError> {
        let iv: [u8; IV_LEN] =
            encoding::decode_array("iv", &payload.iv).map_err(KeyringError::Decryption)?;
        let salt: [u8; SALT_LEN] =
            encoding::decode_array("salt", &payload.salt).map_err(KeyringError::Decryption)?;
        let title = encoding::decode("encrypted title", &payload.encrypted_title)
            .map_err(KeyringError::Decryption)?;
        let content = encoding::decode("encrypted content", &payload.encrypted_content)
            .map_err(KeyringError::Decryption)?;

        let (_, key) = self.provider.derive_key(user, &salt)?;
        let open_one = |field, sealed: &[u8]| -> Result<String, KeyringError> {
            let plaintext = open_field(key.expose(), &iv, &salt, field, sealed)
                .map_err(KeyringError::Decryption)?;
            String::from_utf8(plaintext.expose().to_vec()).map_err(|_| {
                KeyringError::Decryption(CryptoError::Encoding(
                    "decrypted field is not valid UTF-8".into(),
                ))
            })
        };
        Ok(DecryptedNote::new(
            open_one(Field::Title, &title)?,
            open_one(Field::Content, &content)?,
        ))
    }
}
