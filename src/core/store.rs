//! Shared in-memory string store backing counters, stamps and locks
//!
//! String-keyed, string-valued entries with optional expiry. All state of
//! the accounting core lives here; the services are stateless over it.
//! Multi-key mutations run as a closure under the store mutex via
//! [`SharedStore::atomically`], so a script either completes fully or not
//! at all and no reader observes a torn intermediate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

/// A single stored entry
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }
}

/// Transaction view handed to atomic scripts
///
/// Expired entries read as absent. Writes through `set` persist without
/// expiry; `set_ex` attaches one. Entries are reaped lazily and by the
/// optional background sweep.
pub struct StoreTxn<'a> {
    map: &'a mut HashMap<String, Entry>,
    now: Instant,
}

impl StoreTxn<'_> {
    pub fn get(&self, key: &str) -> Option<String> {
        self.map
            .get(key)
            .filter(|entry| !entry.is_expired(self.now))
            .map(|entry| entry.value.clone())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.map.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    pub fn set_ex(&mut self, key: &str, value: impl Into<String>, ttl: Duration) {
        self.map.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: Some(self.now + ttl),
            },
        );
    }

    /// Set only if the key is absent (or expired). Returns whether the
    /// write happened.
    pub fn set_nx_ex(&mut self, key: &str, value: impl Into<String>, ttl: Duration) -> bool {
        if self.map.get(key).is_some_and(|e| !e.is_expired(self.now)) {
            return false;
        }
        self.set_ex(key, value, ttl);
        true
    }

    /// Add `delta` to an existing integer value in place, keeping its
    /// expiry. Returns the new value, or `None` when the key is absent,
    /// expired, or not an integer.
    pub fn incr_by(&mut self, key: &str, delta: i64) -> Option<i64> {
        let now = self.now;
        let entry = self.map.get_mut(key).filter(|e| !e.is_expired(now))?;
        let current: i64 = entry.value.parse().ok()?;
        let updated = current + delta;
        entry.value = updated.to_string();
        Some(updated)
    }

    /// Refresh the expiry of a live key. Returns whether the key was live.
    pub fn expire(&mut self, key: &str, ttl: Duration) -> bool {
        let now = self.now;
        match self.map.get_mut(key).filter(|e| !e.is_expired(now)) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                true
            }
            None => false,
        }
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }
}

/// Shared in-memory store, effective across every service holding the
/// same `Arc`
pub struct SharedStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl Default for SharedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Run a script against the store. The closure executes under the
    /// store mutex; nothing else reads or writes until it returns.
    pub fn atomically<R>(&self, f: impl FnOnce(&mut StoreTxn<'_>) -> R) -> R {
        let mut map = self.inner.lock();
        let mut txn = StoreTxn {
            map: &mut *map,
            now: Instant::now(),
        };
        f(&mut txn)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.atomically(|t| t.get(key))
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.atomically(|t| t.set(key, value))
    }

    pub fn set_ex(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        self.atomically(|t| t.set_ex(key, value, ttl))
    }

    pub fn set_nx_ex(&self, key: &str, value: impl Into<String>, ttl: Duration) -> bool {
        self.atomically(|t| t.set_nx_ex(key, value, ttl))
    }

    pub fn del(&self, key: &str) -> bool {
        self.atomically(|t| t.del(key))
    }

    /// Number of entries held, including expired ones not yet reaped
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut map = self.inner.lock();
        let now = Instant::now();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now));
        before - map.len()
    }

    /// Start a background task reaping expired entries on an interval
    pub fn spawn_expiry_sweep(
        self: &Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(count = removed, "Purged expired store entries");
                }
            }
        })
    }
}
