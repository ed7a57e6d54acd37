//! Bounded, TTL-evicting memo of decrypted notes.
//!
//! - capacity bound: on insert at capacity the single oldest-inserted entry
//!   is evicted (insertion order, not recency)
//! - TTL: an entry older than the TTL is never served, and is dropped on read
//! - sweep: [`DecryptCache::sweep_expired`] drops every expired entry; the
//!   [`CacheSweeper`] thread calls it on an interval until stopped
//!
//! Keys are namespaced by user so one user's entries can be purged alone.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::identity::UserId;
use crate::payload::{DecryptedNote, EncryptedNotePayload};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic time source, injectable for tests.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset = offset.saturating_add(by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base.checked_add(offset).unwrap_or(self.base)
    }
}

// ---------------------------------------------------------------------------
// Cache key
// ---------------------------------------------------------------------------

/// Identity of one ciphertext for one user.
///
/// The digest covers every payload field, so a payload that differs in any
/// byte (including a tampered one) never hits an entry made for another.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    user: UserId,
    digest: [u8; 32],
}

impl CacheKey {
    /// Key for `payload` as decrypted by `user`.
    #[must_use]
    pub fn new(user: &UserId, payload: &EncryptedNotePayload) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in [
            payload.encrypted_title.as_str(),
            payload.encrypted_content.as_str(),
            payload.iv.as_str(),
            payload.salt.as_str(),
        ] {
            // Length-prefix each field so boundaries cannot shift.
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        Self {
            user: user.clone(),
            digest: *hasher.finalize().as_bytes(),
        }
    }
}

impl std::fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CacheKey({})", self.user.redacted())
    }
}

// ---------------------------------------------------------------------------
// DecryptCache
// ---------------------------------------------------------------------------

struct CacheEntry {
    note: DecryptedNote,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<CacheKey, CacheEntry>,
    order: VecDeque<CacheKey>,
}

impl CacheInner {
    fn remove(&mut self, key: &CacheKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

/// Bounded decrypted-note cache.
pub struct DecryptCache {
    capacity: usize,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<CacheInner>,
}

impl std::fmt::Debug for DecryptCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecryptCache")
            .field("capacity", &self.capacity)
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl DecryptCache {
    /// Empty cache. A zero `capacity` is treated as one.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            clock,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.ttl
    }

    /// Fresh entry for `key`, if any. An expired entry is removed.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<DecryptedNote> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let entry = inner.entries.get(key)?;
        if self.is_expired(entry, now) {
            inner.remove(key);
            return None;
        }
        Some(entry.note.clone())
    }

    /// Insert or replace `key`. At capacity the oldest entry is evicted first.
    pub fn insert(&self, key: CacheKey, note: DecryptedNote) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.remove(&key);
        while inner.entries.len() >= self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
        inner.order.push_back(key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                note,
                inserted_at: now,
            },
        );
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner
            .entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
        let CacheInner { entries, order } = &mut *inner;
        order.retain(|k| entries.contains_key(k));
        before.saturating_sub(entries.len())
    }

    /// Drop every entry belonging to `user`. Returns how many were removed.
    pub fn purge_user(&self, user: &UserId) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|k, _| &k.user != user);
        inner.order.retain(|k| &k.user != user);
        before.saturating_sub(inner.entries.len())
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Number of entries currently held (expired ones included until swept).
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// `true` when the cache holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Background sweeper
// ---------------------------------------------------------------------------

/// Handle to the periodic sweep thread. Stops on [`CacheSweeper::stop`] or
/// drop.
pub struct CacheSweeper {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for CacheSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheSweeper")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl CacheSweeper {
    /// Spawn a thread that sweeps `cache` every `interval`.
    ///
    /// The thread holds only a weak reference: once the cache is dropped the
    /// thread exits on its next tick.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be spawned.
    pub fn spawn(cache: &Arc<DecryptCache>, interval: Duration) -> std::io::Result<Self> {
        let weak: Weak<DecryptCache> = Arc::downgrade(cache);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let handle = std::thread::Builder::new()
            .name("notecrypt-cache-sweeper".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(cache) = weak.upgrade() else {
                            break;
                        };
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            tracing::debug!(removed, "decrypt cache sweep");
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it to exit. Idempotent.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// `true` until [`CacheSweeper::stop`] has run.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
