//! Key Provider: resolves a user's key material across the two key modes.
//!
//! Resolution order for [`KeyProvider::user_secret`]:
//! 1. unlocked master key in the durable store → master mode
//! 2. unlocked master key held for this session only → master mode
//! 3. master password set up but locked → [`KeyringError::Locked`]
//! 4. anonymous secret already cached in memory
//! 5. anonymous secret in the durable store (cached on read)
//! 6. a new 64-byte random anonymous secret, persisted with
//!    insert-if-absent so an existing secret is never replaced

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use notecrypt_crypto_core::{
    derive_note_key, encoding, DerivedKey, Salt, SecretBuffer, SecretBytes, KEY_LEN,
};

use zeroize::Zeroize;

use crate::error::KeyringError;
use crate::identity::UserId;
use crate::store::{EntryKind, KeyStore, FLAG_TRUE};

/// Length of the random per-device anonymous secret in bytes.
pub const ANONYMOUS_SECRET_LEN: usize = 64;

/// Which key mode a user is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Random per-device secret, PBKDF2-stretched per note salt.
    Anonymous,
    /// Password-derived key, used directly.
    Master,
}

/// Resolved key material for one user.
#[derive(Clone)]
pub enum UserKeyMaterial {
    /// The 64-byte anonymous secret.
    Anonymous(Arc<SecretBuffer>),
    /// The 32-byte unlocked master key.
    Master(Arc<DerivedKey>),
}

impl UserKeyMaterial {
    /// Mode this material belongs to.
    #[must_use]
    pub const fn mode(&self) -> KeyMode {
        match self {
            Self::Anonymous(_) => KeyMode::Anonymous,
            Self::Master(_) => KeyMode::Master,
        }
    }

    /// Raw bytes, for derivation only.
    #[must_use]
    pub fn expose(&self) -> &[u8] {
        match self {
            Self::Anonymous(secret) => secret.expose(),
            Self::Master(key) => key.expose(),
        }
    }
}

impl fmt::Debug for UserKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserKeyMaterial({:?}, ***)", self.mode())
    }
}

/// Resolves and caches per-user key material.
pub struct KeyProvider {
    store: Arc<dyn KeyStore>,
    iterations: u32,
    anonymous: Mutex<HashMap<UserId, Arc<SecretBuffer>>>,
    session_master: Mutex<HashMap<UserId, Arc<DerivedKey>>>,
}

impl fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProvider")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl KeyProvider {
    /// Provider over `store`, stretching anonymous secrets with `iterations`.
    #[must_use]
    pub fn new(store: Arc<dyn KeyStore>, iterations: u32) -> Self {
        Self {
            store,
            iterations,
            anonymous: Mutex::new(HashMap::new()),
            session_master: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the user's current key material.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::Locked`] if a master password is set up but no
    ///   master key is unlocked; no anonymous secret is created then
    /// - [`KeyringError::Storage`] if the durable store fails
    /// - [`KeyringError::CorruptState`] if a stored secret or key cannot be
    ///   decoded; a corrupt anonymous secret is never regenerated
    /// - [`KeyringError::Crypto`] if the CSPRNG fails
    pub fn user_secret(&self, user: &UserId) -> Result<UserKeyMaterial, KeyringError> {
        if let Some(key) = self.stored_master_key(user)? {
            return Ok(UserKeyMaterial::Master(Arc::new(key)));
        }
        if let Some(key) = self.session_master_key(user) {
            return Ok(UserKeyMaterial::Master(key));
        }
        if self.has_master_flag(user)? {
            return Err(KeyringError::Locked);
        }
        if let Some(secret) = self
            .anonymous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
        {
            return Ok(UserKeyMaterial::Anonymous(Arc::clone(secret)));
        }

        let entry = EntryKind::AnonymousSecret.key_for(user);
        let encoded = if let Some(existing) = self.store.get(&entry)? {
            existing
        } else {
            let mut fresh = encoding::encode(SecretBuffer::random(ANONYMOUS_SECRET_LEN)?.expose());
            let stored = self.store.insert_if_absent(&entry, &fresh)?;
            // Another caller may have won the insert.
            if stored == fresh {
                tracing::info!(user = %user.redacted(), "anonymous secret created");
            }
            fresh.zeroize();
            stored
        };

        let secret = encoding::decode_secret("anonymous secret", &encoded)
            .map_err(|e| KeyringError::CorruptState(e.to_string()))?;
        if secret.is_empty() {
            return Err(KeyringError::CorruptState("anonymous secret is empty".into()));
        }
        let secret = Arc::new(secret);
        self.anonymous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.clone(), Arc::clone(&secret));
        Ok(UserKeyMaterial::Anonymous(secret))
    }

    /// The user's current mode, without creating an anonymous secret.
    ///
    /// # Errors
    ///
    /// Same as [`KeyProvider::user_secret`], minus CSPRNG failures.
    pub fn mode(&self, user: &UserId) -> Result<KeyMode, KeyringError> {
        if self.stored_master_key(user)?.is_some() || self.session_master_key(user).is_some() {
            Ok(KeyMode::Master)
        } else {
            Ok(KeyMode::Anonymous)
        }
    }

    /// Derive the AES-256-GCM key for a payload carrying `salt`.
    ///
    /// In master mode the unlocked key is used as-is and `salt` does not
    /// influence it; the cipher still authenticates the salt.
    ///
    /// # Errors
    ///
    /// Same as [`KeyProvider::user_secret`], plus [`KeyringError::Crypto`]
    /// if PBKDF2 rejects its input.
    pub fn derive_key(
        &self,
        user: &UserId,
        salt: &Salt,
    ) -> Result<(KeyMode, DerivedKey), KeyringError> {
        match self.user_secret(user)? {
            UserKeyMaterial::Master(key) => Ok((KeyMode::Master, (*key).clone())),
            UserKeyMaterial::Anonymous(secret) => {
                let key =
                    derive_note_key(user.as_str(), secret.expose(), salt, self.iterations)?;
                Ok((KeyMode::Anonymous, key))
            }
        }
    }

    /// Hold an unlocked master key for this process only.
    pub(crate) fn install_session_master(&self, user: &UserId, key: DerivedKey) {
        self.session_master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user.clone(), Arc::new(key));
    }

    /// Drop every in-memory secret held for `user`.
    pub(crate) fn forget_user(&self, user: &UserId) {
        self.anonymous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user);
        self.session_master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(user);
    }

    /// Drop every in-memory secret for every user.
    pub fn clear_memory(&self) {
        self.anonymous
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.session_master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn stored_master_key(&self, user: &UserId) -> Result<Option<DerivedKey>, KeyringError> {
        let Some(encoded) = self.store.get(&EntryKind::MasterKey.key_for(user))? else {
            return Ok(None);
        };
        let bytes = encoding::decode_secret("master key", &encoded)
            .map_err(|e| KeyringError::CorruptState(e.to_string()))?;
        let key = SecretBytes::<KEY_LEN>::from_slice(bytes.expose())
            .map_err(|e| KeyringError::CorruptState(e.to_string()))?;
        Ok(Some(key))
    }

    /// The unlocked master key for `user`, durable or session-only.
    pub(crate) fn master_key(
        &self,
        user: &UserId,
    ) -> Result<Option<Arc<DerivedKey>>, KeyringError> {
        if let Some(key) = self.stored_master_key(user)? {
            return Ok(Some(Arc::new(key)));
        }
        Ok(self.session_master_key(user))
    }

    fn has_master_flag(&self, user: &UserId) -> Result<bool, KeyringError> {
        Ok(self
            .store
            .get(&EntryKind::HasMasterPassword.key_for(user))?
            .is_some_and(|flag| flag == FLAG_TRUE))
    }

    fn session_master_key(&self, user: &UserId) -> Option<Arc<DerivedKey>> {
        self.session_master
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const ITERATIONS: u32 = 1_000;

    fn user(id: &str) -> UserId {
        UserId::parse(id).unwrap()
    }

    #[test]
    fn anonymous_secret_created_once_and_cached() {
        let store = MemoryStore::new();
        let provider = KeyProvider::new(Arc::new(store.clone()), ITERATIONS);
        let u = user("user-1");

        let first = provider.user_secret(&u).unwrap();
        assert_eq!(first.mode(), KeyMode::Anonymous);
        assert_eq!(first.expose().len(), ANONYMOUS_SECRET_LEN);
        let second = provider.user_secret(&u).unwrap();
        assert_eq!(first.expose(), second.expose());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn anonymous_secret_survives_restart() {
        let store = MemoryStore::new();
        let u = user("user-1");
        let before = KeyProvider::new(Arc::new(store.clone()), ITERATIONS)
            .user_secret(&u)
            .unwrap();
        let after = KeyProvider::new(Arc::new(store), ITERATIONS)
            .user_secret(&u)
            .unwrap();
        assert_eq!(before.expose(), after.expose());
    }

    #[test]
    fn stored_master_key_wins() {
        let store = MemoryStore::new();
        let provider = KeyProvider::new(Arc::new(store.clone()), ITERATIONS);
        let u = user("user-1");
        provider.user_secret(&u).unwrap();

        store
            .put(
                &EntryKind::MasterKey.key_for(&u),
                &encoding::encode(&[5u8; KEY_LEN]),
            )
            .unwrap();
        let material = provider.user_secret(&u).unwrap();
        assert_eq!(material.mode(), KeyMode::Master);
        assert_eq!(material.expose(), &[5u8; KEY_LEN]);
        assert_eq!(provider.mode(&u).unwrap(), KeyMode::Master);
    }

    #[test]
    fn corrupt_anonymous_secret_is_not_regenerated() {
        let store = MemoryStore::new();
        let u = user("user-1");
        let entry = EntryKind::AnonymousSecret.key_for(&u);
        store.put(&entry, "***not base64***").unwrap();

        let provider = KeyProvider::new(Arc::new(store.clone()), ITERATIONS);
        let err = provider.user_secret(&u).expect_err("corrupt secret");
        assert!(matches!(err, KeyringError::CorruptState(_)));
        assert_eq!(store.get(&entry).unwrap().as_deref(), Some("***not base64***"));
    }

    #[test]
    fn wrong_length_master_key_is_corrupt_state() {
        let store = MemoryStore::new();
        let u = user("user-1");
        store
            .put(&EntryKind::MasterKey.key_for(&u), &encoding::encode(&[1u8; 7]))
            .unwrap();
        let provider = KeyProvider::new(Arc::new(store), ITERATIONS);
        assert!(matches!(
            provider.user_secret(&u),
            Err(KeyringError::CorruptState(_))
        ));
    }

    #[test]
    fn anonymous_derivation_depends_on_salt() {
        let provider = KeyProvider::new(Arc::new(MemoryStore::new()), ITERATIONS);
        let u = user("user-1");
        let (mode, a) = provider.derive_key(&u, &[1u8; 32]).unwrap();
        let (_, b) = provider.derive_key(&u, &[2u8; 32]).unwrap();
        assert_eq!(mode, KeyMode::Anonymous);
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn session_master_key_is_memory_only() {
        let store = MemoryStore::new();
        let provider = KeyProvider::new(Arc::new(store.clone()), ITERATIONS);
        let u = user("user-1");
        provider.install_session_master(&u, SecretBytes::new([9u8; KEY_LEN]));

        let (mode, key) = provider.derive_key(&u, &[0u8; 32]).unwrap();
        assert_eq!(mode, KeyMode::Master);
        assert_eq!(key.expose(), &[9u8; KEY_LEN]);
        assert!(store.is_empty());

        provider.forget_user(&u);
        assert_eq!(provider.mode(&u).unwrap(), KeyMode::Anonymous);
    }

    #[test]
    fn locked_master_password_never_falls_back_to_anonymous() {
        let store = MemoryStore::new();
        let u = user("user-2");
        store
            .put(&EntryKind::HasMasterPassword.key_for(&u), FLAG_TRUE)
            .unwrap();
        let provider = KeyProvider::new(Arc::new(store.clone()), ITERATIONS);

        assert!(matches!(provider.user_secret(&u), Err(KeyringError::Locked)));
        assert!(matches!(
            provider.derive_key(&u, &[1u8; 32]),
            Err(KeyringError::Locked)
        ));
        assert!(store
            .get(&EntryKind::AnonymousSecret.key_for(&u))
            .unwrap()
            .is_none());
        assert_eq!(provider.mode(&u).unwrap(), KeyMode::Anonymous);
    }

    #[test]
    fn locked_state_ignores_cached_anonymous_secret() {
        let store = MemoryStore::new();
        let provider = KeyProvider::new(Arc::new(store.clone()), ITERATIONS);
        let u = user("user-2");
        provider.user_secret(&u).unwrap();
        store
            .put(&EntryKind::HasMasterPassword.key_for(&u), FLAG_TRUE)
            .unwrap();
        assert!(matches!(provider.user_secret(&u), Err(KeyringError::Locked)));
    }

    #[test]
    fn racing_devices_share_the_winning_secret() {
        let store = MemoryStore::new();
        let u = user("user-1");
        let secrets: Vec<Vec<u8>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let provider = KeyProvider::new(Arc::new(store.clone()), ITERATIONS);
                    let u = &u;
                    scope.spawn(move || provider.user_secret(u).unwrap().expose().to_vec())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let stored = store
            .get(&EntryKind::AnonymousSecret.key_for(&u))
            .unwrap()
            .unwrap();
        assert_eq!(store.len(), 1);
        for secret in secrets {
            assert_eq!(encoding::encode(&secret), stored);
        }
    }

    #[test]
    fn material_debug_is_masked() {
        let provider = KeyProvider::new(Arc::new(MemoryStore::new()), ITERATIONS);
        let material = provider.user_secret(&user("user-1")).unwrap();
        assert_eq!(format!("{material:?}"), "UserKeyMaterial(Anonymous, ***)");
    }
}
