//! SQLite-backed [`KeyStore`] with an embedded migration runner.
//!
//! Every [`WriteBatch`] runs inside one transaction, so a crash between the
//! flag, key and legacy-secret writes of a mode transition leaves either the
//! old state or the new one on disk.

use std::fmt;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::KeyringError;
use crate::store::{KeyStore, WriteBatch, WriteOp};

// ---------------------------------------------------------------------------
// Embedded migrations
// ---------------------------------------------------------------------------

/// Forward-only SQL migrations, embedded at compile time.
/// Index 0 → version 1, index 1 → version 2, etc.
const MIGRATIONS: &[&str] = &[include_str!("../migrations/001_key_store.sql")];

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Durable key store in a single SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SqliteStore(***)")
    }
}

impl SqliteStore {
    /// Open (or create) the key store at `path` and run pending migrations.
    ///
    /// On Unix the file is restricted to owner read/write.
    ///
    /// # Errors
    ///
    /// - [`KeyringError::Storage`] if the database cannot be opened or a
    ///   migration fails.
    pub fn open(path: &Path) -> Result<Self, KeyringError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        let store = Self::from_connection(conn)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| KeyringError::Storage(format!("failed to restrict key store: {e}")))?;
        }

        Ok(store)
    }

    /// Open a private in-memory database (tests, ephemeral sessions).
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Storage`] if a migration fails.
    pub fn open_in_memory() -> Result<Self, KeyringError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self, KeyringError> {
        run_migrations(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Returns the current schema version (`PRAGMA user_version`).
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Storage`] if the pragma query fails.
    pub fn schema_version(&self) -> Result<i32, KeyringError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
    }
}

impl KeyStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, KeyringError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let value = conn
            .query_row(
                "SELECT value FROM key_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn insert_if_absent(&self, key: &str, value: &str) -> Result<String, KeyringError> {
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO key_store (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        let stored: String = tx.query_row(
            "SELECT value FROM key_store WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )?;
        tx.commit()?;
        Ok(stored)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), KeyringError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;
        for op in batch.ops() {
            match op {
                WriteOp::Put { key, value } => {
                    tx.execute(
                        "INSERT INTO key_store (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET
                             value = excluded.value,
                             updated_at = strftime('%s', 'now')",
                        params![key, value],
                    )?;
                }
                WriteOp::Delete { key } => {
                    tx.execute("DELETE FROM key_store WHERE key = ?1", params![key])?;
                }
            }
        }
        // Dropping an uncommitted transaction rolls it back, so an error
        // above leaves the store untouched.
        tx.commit()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Migration runner
// ---------------------------------------------------------------------------

/// Apply all pending migrations sequentially, each in its own transaction.
fn run_migrations(conn: &mut Connection) -> Result<(), KeyringError> {
    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for (idx, sql) in MIGRATIONS.iter().enumerate() {
        let version = idx
            .checked_add(1)
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| KeyringError::Storage("migration index overflow".into()))?;

        if version <= current {
            continue;
        }

        let tx = conn.transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| KeyringError::Storage(format!("migration {version} failed: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    Ok(())
}
