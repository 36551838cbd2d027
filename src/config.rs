//! Injected cache and lock configuration
//!
//! The core keeps no module-level mutable state; everything tunable is
//! carried in this struct and handed to the services at construction.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default TTL for confirmed and pending counters, in seconds
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 30;

/// Default staleness bound for a family's `fetched_at` stamp, in milliseconds
pub const DEFAULT_CACHE_MAX_AGE_MS: i64 = 3_600_000;

/// Default auto-expiry for held named locks, in seconds
pub const DEFAULT_LOCK_TTL_SECONDS: u64 = 10;

/// Default bounded wait for lock acquisition, in milliseconds
pub const DEFAULT_LOCK_WAIT_TIMEOUT_MS: u64 = 10_000;

/// Tunables for the quota cache and its lock coordination
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuotaCacheConfig {
    /// TTL applied to confirmed and pending counter keys
    pub cache_ttl_seconds: u64,
    /// Age beyond which a family's confirmed counters are treated as a miss
    pub cache_max_age_ms: i64,
    /// Auto-expiry of a held lock, protecting against crashed holders
    pub lock_ttl_seconds: u64,
    /// Upper bound on how long a caller waits to acquire a lock
    pub lock_wait_timeout_ms: u64,
}

impl Default for QuotaCacheConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            cache_max_age_ms: DEFAULT_CACHE_MAX_AGE_MS,
            lock_ttl_seconds: DEFAULT_LOCK_TTL_SECONDS,
            lock_wait_timeout_ms: DEFAULT_LOCK_WAIT_TIMEOUT_MS,
        }
    }
}

impl QuotaCacheConfig {
    /// Read settings from the application configuration tree, falling back
    /// to defaults for any key that is absent
    pub fn from_config(config: &config::Config) -> Self {
        Self {
            cache_ttl_seconds: config
                .get_int("quota.cache.ttlSeconds")
                .unwrap_or(DEFAULT_CACHE_TTL_SECONDS as i64)
                .max(0) as u64,
            cache_max_age_ms: config
                .get_int("quota.cache.maxAgeMs")
                .unwrap_or(DEFAULT_CACHE_MAX_AGE_MS),
            lock_ttl_seconds: config
                .get_int("quota.lock.ttlSeconds")
                .unwrap_or(DEFAULT_LOCK_TTL_SECONDS as i64)
                .max(0) as u64,
            lock_wait_timeout_ms: config
                .get_int("quota.lock.waitTimeoutMs")
                .unwrap_or(DEFAULT_LOCK_WAIT_TIMEOUT_MS as i64)
                .max(0) as u64,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_seconds)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}
