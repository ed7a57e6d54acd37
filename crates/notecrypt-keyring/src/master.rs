//! Master Password Manager: setup, unlock, lock and the offline password check.
//!
//! The master key is `PBKDF2(password, master_key_domain(user_id))`, so any
//! device reproduces it from the password alone. Correctness is checked
//! locally against a verification blob: the literal `"test"` sealed under
//! the master key. Setup writes it; a device that only ever unlocked writes
//! it on its first master-mode encryption.
//!
//! Setup and a successful unlock both commit one [`WriteBatch`]:
//!
//! | entry | write |
//! |---|---|
//! | has-master-password | `"true"` |
//! | master-key | exported key (`UntilExplicitLock`) / removed (`SessionOnly`) |
//! | anonymous-secret | removed |
//! | verification-blob | sealed under the new key (setup only) |

use std::sync::{Arc, Mutex, PoisonError};

use notecrypt_crypto_core::{
    derive_master_key, encoding, open_field, random_iv, seal_field, CryptoError, DerivedKey,
    Field, Iv, IV_LEN,
};
use serde::{Deserialize, Serialize};

use crate::cache::DecryptCache;
use crate::config::KeyRetention;
use crate::error::KeyringError;
use crate::identity::UserId;
use crate::provider::{KeyMode, KeyProvider};
use crate::store::{EntryKind, KeyStore, WriteBatch, FLAG_TRUE};

/// Known plaintext sealed into the verification blob.
const VERIFICATION_PLAINTEXT: &[u8] = b"test";

/// Persisted known-plaintext ciphertext for offline password checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationBlob {
    /// Base64 `ciphertext ∥ tag`.
    pub data: String,
    /// Base64 16-byte IV.
    pub iv: String,
}

impl VerificationBlob {
    /// Seal the known plaintext under `(key, iv)`.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`CryptoError`] if sealing fails.
    pub fn seal(key: &DerivedKey, iv: &Iv) -> Result<Self, CryptoError> {
        let data = seal_field(key.expose(), iv, &[], Field::Verification, VERIFICATION_PLAINTEXT)?;
        Ok(Self {
            data: encoding::encode(&data),
            iv: encoding::encode(iv),
        })
    }

    /// `Ok(true)` if `key` opens the blob to the known plaintext,
    /// `Ok(false)` if authentication fails.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::CorruptState`] if the blob cannot be decoded.
    pub fn verifies(&self, key: &DerivedKey) -> Result<bool, KeyringError> {
        let iv: [u8; IV_LEN] = encoding::decode_array("verification iv", &self.iv)
            .map_err(|e| KeyringError::CorruptState(e.to_string()))?;
        let data = encoding::decode("verification data", &self.data)
            .map_err(|e| KeyringError::CorruptState(e.to_string()))?;
        match open_field(key.expose(), &iv, &[], Field::Verification, &data) {
            Ok(plaintext) => Ok(plaintext.expose() == VERIFICATION_PLAINTEXT),
            Err(CryptoError::Decryption) => Ok(false),
            Err(e) => Err(KeyringError::Crypto(e)),
        }
    }

    fn to_json(&self) -> Result<String, KeyringError> {
        serde_json::to_string(self)
            .map_err(|e| KeyringError::Storage(format!("failed to encode verification blob: {e}")))
    }

    fn from_json(json: &str) -> Result<Self, KeyringError> {
        serde_json::from_str(json)
            .map_err(|e| KeyringError::CorruptState(format!("verification blob: {e}")))
    }
}

/// Setup/unlock/lock flows and the durable mode flags.
pub struct MasterPasswordManager {
    store: Arc<dyn KeyStore>,
    provider: Arc<KeyProvider>,
    cache: Arc<DecryptCache>,
    iterations: u32,
    retention: KeyRetention,
    transition: Mutex<()>,
}

impl std::fmt::Debug for MasterPasswordManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterPasswordManager")
            .field("iterations", &self.iterations)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl MasterPasswordManager {
    /// Manager sharing the service's store, provider and cache.
    #[must_use]
    pub fn new(
        store: Arc<dyn KeyStore>,
        provider: Arc<KeyProvider>,
        cache: Arc<DecryptCache>,
        iterations: u32,
        retention: KeyRetention,
    ) -> Self {
        Self {
            store,
            provider,
            cache,
            iterations,
            retention,
            transition: Mutex::new(()),
        }
    }

    /// Derive the cross-device master key for `(password, user)`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Crypto`] if PBKDF2 rejects its input.
    pub fn derive(&self, password: &[u8], user: &UserId) -> Result<DerivedKey, KeyringError> {
        Ok(derive_master_key(password, user.as_str(), self.iterations)?)
    }

    /// Set up (or replace) the master password and switch to master mode.
    ///
    /// Retires the anonymous secret and replaces any verification blob with
    /// one sealed under the new key, all in the same transaction.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::Encryption`] if the verification blob cannot be
    ///   sealed
    /// - [`KeyringError::Storage`] if the transaction fails; the store is
    ///   then unchanged
    pub fn setup(&self, password: &[u8], user: &UserId) -> Result<(), KeyringError> {
        let key = self.derive(password, user)?;
        let blob = VerificationBlob::seal(&key, &random_iv()?)
            .map_err(KeyringError::Encryption)?;
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);

        let batch = self
            .transition_batch(user, &key)
            .put(EntryKind::VerificationBlob.key_for(user), blob.to_json()?);
        self.store.apply(batch)?;
        self.finish_transition(user, key);

        tracing::info!(
            user = %user.redacted(),
            retention = ?self.retention,
            "master password set up"
        );
        Ok(())
    }

    /// Unlock with a candidate password.
    ///
    /// Returns `Ok(false)`, without touching any state, when a verification
    /// blob exists and the candidate key does not open it. A device that
    /// never set the password up holds no blob; there the password is
    /// accepted as-is and the blob is written by the first encryption.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::CorruptState`] if the stored blob cannot be parsed
    /// - [`KeyringError::Storage`] if the transaction fails
    pub fn unlock(&self, password: &[u8], user: &UserId) -> Result<bool, KeyringError> {
        let candidate = self.derive(password, user)?;
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);

        match self.verification_blob(user)? {
            Some(blob) => {
                if !blob.verifies(&candidate)? {
                    tracing::warn!(user = %user.redacted(), "master password mismatch");
                    return Ok(false);
                }
            }
            None => {
                tracing::debug!(
                    user = %user.redacted(),
                    "no verification blob yet, accepting master password"
                );
            }
        }

        self.store.apply(self.transition_batch(user, &candidate))?;
        self.finish_transition(user, candidate);

        tracing::info!(user = %user.redacted(), "master password unlocked");
        Ok(true)
    }

    /// Forget the unlocked master key. The flag and verification blob stay,
    /// so the next session must unlock again.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Storage`] if the store fails.
    pub fn lock(&self, user: &UserId) -> Result<(), KeyringError> {
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.delete(&EntryKind::MasterKey.key_for(user))?;
        self.provider.forget_user(user);
        self.cache.purge_user(user);
        tracing::info!(user = %user.redacted(), "master password locked");
        Ok(())
    }

    /// `true` once a master password has been set up for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Storage`] if the store fails.
    pub fn has_master_password(&self, user: &UserId) -> Result<bool, KeyringError> {
        Ok(self
            .store
            .get(&EntryKind::HasMasterPassword.key_for(user))?
            .is_some_and(|flag| flag == FLAG_TRUE))
    }

    /// `true` while an unlocked master key is available for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Storage`] or [`KeyringError::CorruptState`]
    /// if the stored key cannot be read.
    pub fn is_unlocked(&self, user: &UserId) -> Result<bool, KeyringError> {
        Ok(self.provider.mode(user)? == KeyMode::Master)
    }

    /// The stored verification blob, if any.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::CorruptState`] if the entry is not valid JSON.
    pub fn verification_blob(
        &self,
        user: &UserId,
    ) -> Result<Option<VerificationBlob>, KeyringError> {
        self.store
            .get(&EntryKind::VerificationBlob.key_for(user))?
            .map(|json| VerificationBlob::from_json(&json))
            .transpose()
    }

    /// Persist a verification blob sealed under `(key, iv)` unless one
    /// already exists. Called from the encrypt path in master mode.
    ///
    /// Nothing is written when `key` is no longer the user's unlocked master
    /// key, e.g. a setup or unlock committed after the caller resolved it.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Encryption`] if sealing fails or
    /// [`KeyringError::Storage`] if the store fails.
    pub fn ensure_verification_blob(
        &self,
        user: &UserId,
        key: &DerivedKey,
        iv: &Iv,
    ) -> Result<(), KeyringError> {
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = EntryKind::VerificationBlob.key_for(user);
        if self.store.get(&entry)?.is_some() {
            return Ok(());
        }
        let still_current = self
            .provider
            .master_key(user)?
            .is_some_and(|current| current.expose() == key.expose());
        if !still_current {
            tracing::debug!(
                user = %user.redacted(),
                "master key changed, verification blob not written"
            );
            return Ok(());
        }
        let blob = VerificationBlob::seal(key, iv).map_err(KeyringError::Encryption)?;
        self.store.insert_if_absent(&entry, &blob.to_json()?)?;
        tracing::info!(user = %user.redacted(), "verification blob stored");
        Ok(())
    }

    fn transition_batch(&self, user: &UserId, key: &DerivedKey) -> WriteBatch {
        let batch = WriteBatch::new()
            .put(EntryKind::HasMasterPassword.key_for(user), FLAG_TRUE)
            .delete(EntryKind::AnonymousSecret.key_for(user));
        match self.retention {
            KeyRetention::UntilExplicitLock => batch.put(
                EntryKind::MasterKey.key_for(user),
                encoding::encode(key.expose()),
            ),
            KeyRetention::SessionOnly => batch.delete(EntryKind::MasterKey.key_for(user)),
        }
    }

    fn finish_transition(&self, user: &UserId, key: DerivedKey) {
        self.provider.forget_user(user);
        if self.retention == KeyRetention::SessionOnly {
            self.provider.install_session_master(user, key);
        }
        // Anything cached was decrypted under the previous mode.
        self.cache.purge_user(user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SystemClock;
    use crate::store::MemoryStore;
    use std::time::Duration;

    const ITERATIONS: u32 = 1_000;

    struct Fixture {
        store: MemoryStore,
        provider: Arc<KeyProvider>,
        manager: MasterPasswordManager,
    }

    fn fixture(retention: KeyRetention) -> Fixture {
        let store = MemoryStore::new();
        let shared: Arc<dyn KeyStore> = Arc::new(store.clone());
        let provider = Arc::new(KeyProvider::new(Arc::clone(&shared), ITERATIONS));
        let cache = Arc::new(DecryptCache::new(
            8,
            Duration::from_secs(900),
            Arc::new(SystemClock),
        ));
        let manager = MasterPasswordManager::new(
            shared,
            Arc::clone(&provider),
            cache,
            ITERATIONS,
            retention,
        );
        Fixture {
            store,
            provider,
            manager,
        }
    }

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[test]
    fn setup_retires_anonymous_secret_in_one_batch() {
        let f = fixture(KeyRetention::UntilExplicitLock);
        let u = user("user-2");
        f.provider.user_secret(&u).unwrap();
        assert!(f
            .store
            .get(&EntryKind::AnonymousSecret.key_for(&u))
            .unwrap()
            .is_some());

        f.manager.setup(b"correct-horse", &u).unwrap();

        assert!(f
            .store
            .get(&EntryKind::AnonymousSecret.key_for(&u))
            .unwrap()
            .is_none());
        assert!(f.manager.has_master_password(&u).unwrap());
        assert!(f.manager.is_unlocked(&u).unwrap());
        let stored = f.store.get(&EntryKind::MasterKey.key_for(&u)).unwrap().unwrap();
        let expected = f.manager.derive(b"correct-horse", &u).unwrap();
        assert_eq!(stored, encoding::encode(expected.expose()));
    }

    #[test]
    fn unlock_without_blob_is_optimistic() {
        let f = fixture(KeyRetention::UntilExplicitLock);
        let u = user("user-2");
        assert!(f.manager.unlock(b"anything", &u).unwrap());
        assert!(f.manager.has_master_password(&u).unwrap());
    }

    #[test]
    fn setup_writes_blob_so_wrong_password_is_rejected_at_once() {
        let f = fixture(KeyRetention::UntilExplicitLock);
        let u = user("user-2");
        f.manager.setup(b"correct-horse", &u).unwrap();
        let key = f.manager.derive(b"correct-horse", &u).unwrap();
        assert!(f.manager.verification_blob(&u).unwrap().unwrap().verifies(&key).unwrap());

        assert!(f.manager.unlock(b"correct-horse", &u).unwrap());
        assert!(!f.manager.unlock(b"wrong-pass", &u).unwrap());
        let stored = f.store.get(&EntryKind::MasterKey.key_for(&u)).unwrap().unwrap();
        assert_eq!(stored, encoding::encode(key.expose()));
    }

    #[test]
    fn wrong_password_with_blob_changes_nothing() {
        let f = fixture(KeyRetention::UntilExplicitLock);
        let u = user("user-2");
        f.manager.setup(b"correct-horse", &u).unwrap();
        f.manager.lock(&u).unwrap();
        let before = f.store.snapshot();

        assert!(!f.manager.unlock(b"wrong-pass", &u).unwrap());
        assert_eq!(f.store.snapshot(), before);
        assert!(f.manager.has_master_password(&u).unwrap());
        assert!(!f.manager.is_unlocked(&u).unwrap());

        assert!(f.manager.unlock(b"correct-horse", &u).unwrap());
        assert!(f.manager.is_unlocked(&u).unwrap());
    }

    #[test]
    fn replacing_password_replaces_blob() {
        let f = fixture(KeyRetention::UntilExplicitLock);
        let u = user("user-2");
        f.manager.setup(b"first", &u).unwrap();
        f.manager.setup(b"second", &u).unwrap();
        let blob = f.manager.verification_blob(&u).unwrap().unwrap();
        assert!(blob.verifies(&f.manager.derive(b"second", &u).unwrap()).unwrap());
        assert!(!blob.verifies(&f.manager.derive(b"first", &u).unwrap()).unwrap());
    }

    #[test]
    fn ensure_verification_blob_never_overwrites() {
        let f = fixture(KeyRetention::UntilExplicitLock);
        let u = user("user-2");
        // Unlock on a device without a blob, then the first encryption writes it.
        assert!(f.manager.unlock(b"pw", &u).unwrap());
        let key = f.manager.derive(b"pw", &u).unwrap();
        f.manager
            .ensure_verification_blob(&u, &key, &[1u8; IV_LEN])
            .unwrap();
        let first = f.manager.verification_blob(&u).unwrap().unwrap();
        f.manager
            .ensure_verification_blob(&u, &key, &[2u8; IV_LEN])
            .unwrap();
        assert_eq!(f.manager.verification_blob(&u).unwrap().unwrap(), first);
        assert!(first.verifies(&key).unwrap());
    }

    #[test]
    fn stale_key_never_becomes_the_blob() {
        let f = fixture(KeyRetention::UntilExplicitLock);
        let u = user("user-2");
        assert!(f.manager.unlock(b"old-pass", &u).unwrap());
        let stale = f.manager.derive(b"old-pass", &u).unwrap();
        // A second unlock commits before the encryption that resolved `stale`
        // gets to write its blob.
        assert!(f.manager.unlock(b"new-pass", &u).unwrap());

        f.manager
            .ensure_verification_blob(&u, &stale, &[4u8; IV_LEN])
            .unwrap();
        assert!(f.manager.verification_blob(&u).unwrap().is_none());

        let current = f.manager.derive(b"new-pass", &u).unwrap();
        f.manager
            .ensure_verification_blob(&u, &current, &[6u8; IV_LEN])
            .unwrap();
        f.manager.lock(&u).unwrap();
        assert!(!f.manager.unlock(b"old-pass", &u).unwrap());
        assert!(f.manager.unlock(b"new-pass", &u).unwrap());
    }

    #[test]
    fn locked_user_gets_no_blob() {
        let f = fixture(KeyRetention::SessionOnly);
        let u = user("user-2");
        assert!(f.manager.unlock(b"pw", &u).unwrap());
        let key = f.manager.derive(b"pw", &u).unwrap();
        f.manager.lock(&u).unwrap();
        f.manager
            .ensure_verification_blob(&u, &key, &[5u8; IV_LEN])
            .unwrap();
        assert!(f.manager.verification_blob(&u).unwrap().is_none());
    }

    #[test]
    fn corrupt_blob_is_reported() {
        let f = fixture(KeyRetention::UntilExplicitLock);
        let u = user("user-2");
        f.store
            .put(&EntryKind::VerificationBlob.key_for(&u), "{oops")
            .unwrap();
        assert!(matches!(
            f.manager.unlock(b"pw", &u),
            Err(KeyringError::CorruptState(_))
        ));
    }

    #[test]
    fn session_only_keeps_key_out_of_store() {
        let f = fixture(KeyRetention::SessionOnly);
        let u = user("user-2");
        f.manager.setup(b"correct-horse", &u).unwrap();
        assert!(f.store.get(&EntryKind::MasterKey.key_for(&u)).unwrap().is_none());
        assert!(f.manager.is_unlocked(&u).unwrap());

        f.manager.lock(&u).unwrap();
        assert!(!f.manager.is_unlocked(&u).unwrap());
        assert!(f.manager.has_master_password(&u).unwrap());
    }

    #[test]
    fn blob_json_shape() {
        let key = derive_master_key(b"pw", "user-2", ITERATIONS).unwrap();
        let blob = VerificationBlob::seal(&key, &[0u8; IV_LEN]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&blob.to_json().unwrap()).unwrap();
        assert!(value["data"].is_string());
        assert!(value["iv"].is_string());
    }
}
