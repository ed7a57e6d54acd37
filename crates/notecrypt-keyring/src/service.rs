//! `EncryptionService`: the single entry point the API client, onboarding
//! and sign-out flows call into.
//!
//! Every operation takes the raw user id and rejects a blank one with
//! [`KeyringError::MissingIdentity`] before touching any state.

use std::sync::{Arc, Mutex, PoisonError};

use notecrypt_crypto_core::check_csprng;
use serde_json::Value;

use crate::cache::{CacheSweeper, Clock, DecryptCache, SystemClock};
use crate::config::KeyringConfig;
use crate::error::KeyringError;
use crate::identity::UserId;
use crate::master::MasterPasswordManager;
use crate::notes::NoteCipher;
use crate::payload::{DecryptedNote, EncryptedNotePayload, NotePayload};
use crate::provider::{KeyMode, KeyProvider, UserKeyMaterial};
use crate::store::{EntryKind, KeyStore, WriteBatch};

/// Client-side zero-knowledge encryption for notes.
pub struct EncryptionService {
    config: KeyringConfig,
    store: Arc<dyn KeyStore>,
    provider: Arc<KeyProvider>,
    cache: Arc<DecryptCache>,
    master: Arc<MasterPasswordManager>,
    notes: NoteCipher,
    sweeper: Mutex<Option<CacheSweeper>>,
}

impl std::fmt::Debug for EncryptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService")
            .field("config", &self.config)
            .field("cache_len", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl EncryptionService {
    /// Build a service over `store` using the wall clock.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Configuration`] if `config` is invalid or the
    /// OS CSPRNG is unavailable.
    pub fn new(store: Arc<dyn KeyStore>, config: KeyringConfig) -> Result<Self, KeyringError> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Build a service with an explicit cache clock.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptionService::new`].
    pub fn with_clock(
        store: Arc<dyn KeyStore>,
        config: KeyringConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeyringError> {
        config.validate()?;
        check_csprng().map_err(|e| KeyringError::Configuration(e.to_string()))?;

        let provider = Arc::new(KeyProvider::new(Arc::clone(&store), config.kdf_iterations));
        let cache = Arc::new(DecryptCache::new(
            config.cache_capacity,
            config.cache_ttl(),
            clock,
        ));
        let master = Arc::new(MasterPasswordManager::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            Arc::clone(&cache),
            config.kdf_iterations,
            config.key_retention,
        ));
        let notes = NoteCipher::new(
            Arc::clone(&provider),
            Arc::clone(&master),
            Arc::clone(&cache),
        );

        Ok(Self {
            config,
            store,
            provider,
            cache,
            master,
            notes,
            sweeper: Mutex::new(None),
        })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &KeyringConfig {
        &self.config
    }

    /// The decrypt cache, shared with the sweeper.
    #[must_use]
    pub const fn cache(&self) -> &Arc<DecryptCache> {
        &self.cache
    }

    // -- notes ---------------------------------------------------------------

    /// Encrypt a note's title and content for `user_id`.
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`], [`KeyringError::Encryption`],
    /// [`KeyringError::Locked`] while the master password is locked, or a
    /// key resolution failure.
    pub fn encrypt_note_data(
        &self,
        user_id: &str,
        title: &str,
        content: &str,
    ) -> Result<EncryptedNotePayload, KeyringError> {
        let user = UserId::parse(user_id)?;
        self.notes.encrypt(&user, title, content)
    }

    /// Decrypt a payload produced by [`EncryptionService::encrypt_note_data`].
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`], [`KeyringError::Decryption`],
    /// [`KeyringError::Locked`] while the master password is locked, or a
    /// key resolution failure.
    pub fn decrypt_note_data(
        &self,
        user_id: &str,
        payload: &EncryptedNotePayload,
    ) -> Result<DecryptedNote, KeyringError> {
        let user = UserId::parse(user_id)?;
        self.notes.decrypt(&user, payload)
    }

    /// Classify a raw note record as encrypted or legacy plaintext.
    #[must_use]
    pub fn classify_note(record: &Value) -> NotePayload {
        NotePayload::classify(record)
    }

    // -- master password -----------------------------------------------------

    /// `true` once a master password has been set up for `user_id`.
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`] or [`KeyringError::Storage`].
    pub fn has_master_password(&self, user_id: &str) -> Result<bool, KeyringError> {
        self.master.has_master_password(&UserId::parse(user_id)?)
    }

    /// `true` while an unlocked master key is available for `user_id`.
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`], [`KeyringError::Storage`] or
    /// [`KeyringError::CorruptState`].
    pub fn is_master_password_unlocked(&self, user_id: &str) -> Result<bool, KeyringError> {
        self.master.is_unlocked(&UserId::parse(user_id)?)
    }

    /// Set up the master password and migrate `user_id` to master mode.
    ///
    /// Notes encrypted earlier under the anonymous secret are not
    /// re-encrypted and stop decrypting on this device.
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`] or [`KeyringError::Storage`]; on a
    /// storage failure the durable state is unchanged.
    pub fn setup_master_password(&self, password: &str, user_id: &str) -> Result<(), KeyringError> {
        self.master
            .setup(password.as_bytes(), &UserId::parse(user_id)?)
    }

    /// Unlock with `password`. `Ok(false)` means the password is wrong.
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`], [`KeyringError::Storage`] or
    /// [`KeyringError::CorruptState`].
    pub fn unlock_with_master_password(
        &self,
        password: &str,
        user_id: &str,
    ) -> Result<bool, KeyringError> {
        self.master
            .unlock(password.as_bytes(), &UserId::parse(user_id)?)
    }

    /// Forget the unlocked master key for `user_id` until the next unlock.
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`] or [`KeyringError::Storage`].
    pub fn lock_master_password(&self, user_id: &str) -> Result<(), KeyringError> {
        self.master.lock(&UserId::parse(user_id)?)
    }

    // -- key material --------------------------------------------------------

    /// Resolve the key material currently used for `user_id`, creating the
    /// anonymous secret on first use.
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`], [`KeyringError::Locked`],
    /// [`KeyringError::Storage`], [`KeyringError::CorruptState`] or a CSPRNG
    /// failure.
    pub fn user_secret(&self, user_id: &str) -> Result<UserKeyMaterial, KeyringError> {
        self.provider.user_secret(&UserId::parse(user_id)?)
    }

    /// Current key mode for `user_id`.
    ///
    /// # Errors
    ///
    /// Same as [`EncryptionService::is_master_password_unlocked`].
    pub fn key_mode(&self, user_id: &str) -> Result<KeyMode, KeyringError> {
        self.provider.mode(&UserId::parse(user_id)?)
    }

    // -- sign-out ------------------------------------------------------------

    /// Wipe the decrypt cache and every in-memory secret. Durable entries are
    /// kept.
    pub fn clear_encryption_keys(&self) {
        self.cache.clear();
        self.provider.clear_memory();
        tracing::info!("encryption keys cleared from memory");
    }

    /// Delete every durable entry for `user_id` in one batch, then drop its
    /// in-memory secrets and cache entries.
    ///
    /// # Errors
    ///
    /// [`KeyringError::MissingIdentity`] or [`KeyringError::Storage`].
    pub fn clear_user_encryption_data(&self, user_id: &str) -> Result<(), KeyringError> {
        let user = UserId::parse(user_id)?;
        let batch = EntryKind::ALL
            .into_iter()
            .fold(WriteBatch::new(), |batch, kind| batch.delete(kind.key_for(&user)));
        self.store.apply(batch)?;
        self.provider.forget_user(&user);
        let purged = self.cache.purge_user(&user);
        tracing::info!(user = %user.redacted(), purged, "user encryption data cleared");
        Ok(())
    }

    // -- background sweep ----------------------------------------------------

    /// Start the periodic cache sweep. A no-op if it is already running.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Configuration`] if the thread cannot be
    /// spawned.
    pub fn start_cache_sweeper(&self) -> Result<(), KeyringError> {
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(CacheSweeper::is_running) {
            return Ok(());
        }
        let sweeper = CacheSweeper::spawn(&self.cache, self.config.sweep_interval())
            .map_err(|e| KeyringError::Configuration(format!("cannot start cache sweeper: {e}")))?;
        *slot = Some(sweeper);
        tracing::debug!(
            interval_secs = self.config.sweep_interval_secs,
            "cache sweeper started"
        );
        Ok(())
    }

    /// Stop the periodic cache sweep and wait for the thread. Idempotent.
    pub fn stop_cache_sweeper(&self) {
        let taken = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut sweeper) = taken {
            sweeper.stop();
            tracing::debug!("cache sweeper stopped");
        }
    }

    /// `true` while the periodic cache sweep is running.
    #[must_use]
    pub fn is_cache_sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(CacheSweeper::is_running)
    }

    /// Stop the sweeper and wipe all in-memory secrets.
    pub fn shutdown(&self) {
        self.stop_cache_sweeper();
        self.clear_encryption_keys();
    }
}

impl Drop for EncryptionService {
    fn drop(&mut self) {
        self.stop_cache_sweeper();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn config() -> KeyringConfig {
        KeyringConfig {
            kdf_iterations: 1_000,
            ..KeyringConfig::default()
        }
    }

    fn service() -> EncryptionService {
        EncryptionService::new(Arc::new(MemoryStore::new()), config()).unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = KeyringConfig {
            cache_capacity: 0,
            ..config()
        };
        let err = EncryptionService::new(Arc::new(MemoryStore::new()), bad).unwrap_err();
        assert!(matches!(err, KeyringError::Configuration(_)));
    }

    #[test]
    fn blank_user_id_fails_fast() {
        let svc = service();
        assert!(matches!(
            svc.encrypt_note_data("", "t", "c"),
            Err(KeyringError::MissingIdentity)
        ));
        assert!(matches!(
            svc.has_master_password("   "),
            Err(KeyringError::MissingIdentity)
        ));
        assert!(matches!(
            svc.clear_user_encryption_data(""),
            Err(KeyringError::MissingIdentity)
        ));
    }

    #[test]
    fn decrypt_populates_cache_once() {
        let svc = service();
        let payload = svc.encrypt_note_data("user-1", "Hello", "World").unwrap();
        assert!(svc.cache().is_empty());
        svc.decrypt_note_data("user-1", &payload).unwrap();
        svc.decrypt_note_data("user-1", &payload).unwrap();
        assert_eq!(svc.cache().len(), 1);
    }

    #[test]
    fn clear_encryption_keys_keeps_durable_state() {
        let store = MemoryStore::new();
        let svc = EncryptionService::new(Arc::new(store.clone()), config()).unwrap();
        let payload = svc.encrypt_note_data("user-1", "a", "b").unwrap();
        svc.decrypt_note_data("user-1", &payload).unwrap();

        svc.clear_encryption_keys();
        assert!(svc.cache().is_empty());
        assert_eq!(store.len(), 1);
        let note = svc.decrypt_note_data("user-1", &payload).unwrap();
        assert_eq!(note.title, "a");
    }

    #[test]
    fn sweeper_start_stop_is_idempotent() {
        let svc = service();
        svc.start_cache_sweeper().unwrap();
        svc.start_cache_sweeper().unwrap();
        assert!(svc.is_cache_sweeper_running());
        svc.stop_cache_sweeper();
        svc.stop_cache_sweeper();
        assert!(!svc.is_cache_sweeper_running());
    }

    #[test]
    fn shutdown_wipes_memory() {
        let svc = service();
        let payload = svc.encrypt_note_data("user-1", "a", "b").unwrap();
        svc.decrypt_note_data("user-1", &payload).unwrap();
        svc.start_cache_sweeper().unwrap();
        svc.shutdown();
        assert!(!svc.is_cache_sweeper_running());
        assert!(svc.cache().is_empty());
    }

    #[test]
    fn classify_note_delegates() {
        let record = serde_json::json!({"title": "x", "content": "y"});
        assert!(!EncryptionService::classify_note(&record).is_encrypted());
    }
}
