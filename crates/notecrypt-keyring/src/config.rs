//! Keyring tuning knobs: stored as plain JSON beside the key store.
//!
//! None of these values are secret. Missing fields take their defaults so an
//! older `keyring.json` keeps loading after new knobs are added.

use std::fs;
use std::path::Path;
use std::time::Duration;

use notecrypt_crypto_core::DEFAULT_ITERATIONS;
use serde::{Deserialize, Serialize};

use crate::error::KeyringError;

const CONFIG_FILE: &str = "keyring.json";

/// What happens to the master key after a successful setup or unlock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyRetention {
    /// The exported key is written to the durable store and stays there,
    /// across restarts, until `lock_master_password` or a clear.
    #[default]
    UntilExplicitLock,
    /// The key lives only in process memory; a restart requires unlocking
    /// again.
    SessionOnly,
}

/// Keyring configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyringConfig {
    /// PBKDF2 iterations for both key modes.
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,

    /// Maximum number of decrypted notes held in the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Seconds a decrypted note may be served from the cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Seconds between background sweeps of expired cache entries.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Master key retention policy.
    #[serde(default)]
    pub key_retention: KeyRetention,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            kdf_iterations: default_kdf_iterations(),
            cache_capacity: default_cache_capacity(),
            cache_ttl_secs: default_cache_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            key_retention: KeyRetention::default(),
        }
    }
}

const fn default_kdf_iterations() -> u32 {
    DEFAULT_ITERATIONS
}
const fn default_cache_capacity() -> usize {
    100
}
const fn default_cache_ttl_secs() -> u64 {
    900
}
const fn default_sweep_interval_secs() -> u64 {
    300
}

impl KeyringConfig {
    /// Cache TTL as a [`Duration`].
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Sweep interval as a [`Duration`].
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Reject values that would disable key stretching or the cache bounds.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::Configuration`] naming the offending field.
    pub fn validate(&self) -> Result<(), KeyringError> {
        if self.kdf_iterations == 0 {
            return Err(KeyringError::Configuration("kdfIterations must be at least 1".into()));
        }
        if self.cache_capacity == 0 {
            return Err(KeyringError::Configuration("cacheCapacity must be at least 1".into()));
        }
        if self.cache_ttl_secs == 0 {
            return Err(KeyringError::Configuration("cacheTtlSecs must be at least 1".into()));
        }
        if self.sweep_interval_secs == 0 {
            return Err(KeyringError::Configuration("sweepIntervalSecs must be at least 1".into()));
        }
        Ok(())
    }

    /// Load from `{dir}/keyring.json`.
    ///
    /// Returns [`Default::default()`] when the file is missing or contains
    /// invalid JSON.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(CONFIG_FILE);
        fs::read_to_string(&path).map_or_else(
            |_| Self::default(),
            |contents| serde_json::from_str(&contents).unwrap_or_default(),
        )
    }

    /// Persist to `{dir}/keyring.json` via write-to-tmp then rename.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the directory does not exist or the file
    /// system rejects the write/rename.
    pub fn save(&self, dir: &Path) -> std::io::Result<()> {
        let path = dir.join(CONFIG_FILE);
        let tmp = dir.join(".keyring.json.tmp");

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        fs::write(&tmp, &json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
