//! Durable per-device key-value storage.
//!
//! All key material, flags and verification blobs live behind [`KeyStore`].
//! Multi-entry mode transitions go through [`KeyStore::apply`], which must
//! commit a whole [`WriteBatch`] or nothing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::KeyringError;
use crate::identity::UserId;

// ---------------------------------------------------------------------------
// Entry naming
// ---------------------------------------------------------------------------

/// The kinds of durable entry kept per user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Base64 of the 64-byte random per-device secret.
    AnonymousSecret,
    /// Base64 of the exported 32-byte master key while unlocked.
    MasterKey,
    /// `"true"` once a master password has been set up.
    HasMasterPassword,
    /// JSON `{"data", "iv"}` known-plaintext blob.
    VerificationBlob,
}

impl EntryKind {
    /// Every kind, in the order they are purged on account removal.
    pub const ALL: [Self; 4] = [
        Self::AnonymousSecret,
        Self::MasterKey,
        Self::HasMasterPassword,
        Self::VerificationBlob,
    ];

    const fn slug(self) -> &'static str {
        match self {
            Self::AnonymousSecret => "anonymous-secret",
            Self::MasterKey => "master-key",
            Self::HasMasterPassword => "has-master-password",
            Self::VerificationBlob => "verification-blob",
        }
    }

    /// Storage key for this entry, namespaced by user id.
    #[must_use]
    pub fn key_for(self, user: &UserId) -> String {
        format!("notecrypt.{}.{}", self.slug(), user.as_str())
    }
}

/// Persisted value of the has-master-password flag.
pub const FLAG_TRUE: &str = "true";

// ---------------------------------------------------------------------------
// Write batches
// ---------------------------------------------------------------------------

/// A single mutation inside a [`WriteBatch`].
#[derive(Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or replace `key` with `value`.
    Put {
        /// Storage key.
        key: String,
        /// New value.
        value: String,
    },
    /// Remove `key` if present.
    Delete {
        /// Storage key.
        key: String,
    },
}

impl std::fmt::Debug for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Put { key, .. } => write!(f, "Put({key}, ***)"),
            Self::Delete { key } => write!(f, "Delete({key})"),
        }
    }
}

/// An ordered group of writes applied atomically.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Queue an insert-or-replace.
    #[must_use]
    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Put {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue a removal.
    #[must_use]
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Delete { key: key.into() });
        self
    }

    /// The queued operations, in order.
    #[must_use]
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

// ---------------------------------------------------------------------------
// KeyStore
// ---------------------------------------------------------------------------

/// Durable key-value storage for key material and mode flags.
pub trait KeyStore: Send + Sync {
    /// Read one entry.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Storage`] if the backend fails.
    fn get(&self, key: &str) -> Result<Option<String>, KeyringError>;

    /// Store `value` under `key` unless an entry already exists, and return
    /// whichever value is stored afterwards. Existing entries are never
    /// overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Storage`] if the backend fails.
    fn insert_if_absent(&self, key: &str, value: &str) -> Result<String, KeyringError>;

    /// Apply every operation of `batch`, or none of them.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Storage`] if the backend fails; the store is
    /// then unchanged.
    fn apply(&self, batch: WriteBatch) -> Result<(), KeyringError>;

    /// Convenience wrapper for a one-entry batch.
    ///
    /// # Errors
    ///
    /// Same as [`KeyStore::apply`].
    fn put(&self, key: &str, value: &str) -> Result<(), KeyringError> {
        self.apply(WriteBatch::new().put(key, value))
    }

    /// Convenience wrapper for a one-entry removal.
    ///
    /// # Errors
    ///
    /// Same as [`KeyStore::apply`].
    fn delete(&self, key: &str) -> Result<(), KeyringError> {
        self.apply(WriteBatch::new().delete(key))
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process [`KeyStore`]. Clones share the same map, so dropping a service
/// and building a new one over a clone simulates a process restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent store seeded with `entries` (e.g. a second device).
    #[must_use]
    pub fn from_entries(entries: HashMap<String, String>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    /// Copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemoryStore(entries={})", self.len())
    }
}

impl KeyStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyringError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn insert_if_absent(&self, key: &str, value: &str) -> Result<String, KeyringError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .entry(key.to_owned())
            .or_insert_with(|| value.to_owned())
            .clone())
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), KeyringError> {
        // One lock for the whole batch: readers see all of it or none.
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for op in batch.ops {
            match op {
                WriteOp::Put { key, value } => {
                    entries.insert(key, value);
                }
                WriteOp::Delete { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }
}
