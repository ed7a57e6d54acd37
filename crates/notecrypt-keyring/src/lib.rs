//! `notecrypt-keyring`: key lifecycle for client-side zero-knowledge notes.
//!
//! Two key modes coexist per user:
//!
//! - **anonymous**: a random 64-byte per-device secret, stretched with
//!   PBKDF2 per note salt
//! - **master**: a key derived from the user's master password, identical on
//!   every device
//!
//! [`EncryptionService`] ties together the [`KeyStore`], the
//! [`KeyProvider`], the [`DecryptCache`] and the [`MasterPasswordManager`].
//! Primitives come from `notecrypt-crypto-core`.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::arithmetic_side_effects))]

pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod master;
pub mod notes;
pub mod payload;
pub mod provider;
pub mod service;
pub mod sqlite;
pub mod store;

pub use cache::{CacheKey, CacheSweeper, Clock, DecryptCache, ManualClock, SystemClock};
pub use config::{KeyRetention, KeyringConfig};
pub use error::KeyringError;
pub use identity::UserId;
pub use master::{MasterPasswordManager, VerificationBlob};
pub use notes::NoteCipher;
pub use payload::{
    is_note_encrypted, DecryptedNote, EncryptedNotePayload, NotePayload, PlaintextNote,
};
pub use provider::{KeyMode, KeyProvider, UserKeyMaterial, ANONYMOUS_SECRET_LEN};
pub use service::EncryptionService;
pub use sqlite::SqliteStore;
pub use store::{EntryKind, KeyStore, MemoryStore, WriteBatch, WriteOp};
