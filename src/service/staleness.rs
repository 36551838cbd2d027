//! Per-(organization, family) rehydrate stamps
//!
//! Counter TTLs sweep the ordinary cache, but `apply_delta` refreshes a
//! counter's TTL on every mutation, so a busy counter could stay live and
//! drift from the source of truth indefinitely. The `fetched_at` stamp
//! bounds that drift: once it is older than the configured max age the
//! whole family reads as a cache miss and the next read rehydrates.

use std::sync::Arc;

use crate::core::store::{SharedStore, StoreTxn};
use crate::model::quota::ResourceFamily;

/// Store key of a family's last-rehydrate stamp
pub fn fetched_at_key(organization_id: &str, family: ResourceFamily) -> String {
    format!(
        "org:{}:resource:{}:usage:fetched_at",
        organization_id,
        family.as_str()
    )
}

/// Current wall-clock time in epoch milliseconds
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whether a raw stamp value proves the family was rehydrated recently
/// enough. Absent or non-numeric stamps are never fresh.
pub fn is_stamp_fresh(raw: Option<&str>, now_ms: i64, max_age_ms: i64) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    let Ok(stamp) = raw.parse::<i64>() else {
        return false;
    };
    now_ms - stamp <= max_age_ms
}

/// Tracks when each (organization, family) was last rehydrated
#[derive(Clone)]
pub struct StalenessTracker {
    store: Arc<SharedStore>,
    max_age_ms: i64,
}

impl StalenessTracker {
    pub fn new(store: Arc<SharedStore>, max_age_ms: i64) -> Self {
        Self { store, max_age_ms }
    }

    /// Record a successful rehydrate at the current wall-clock time
    pub fn reset(&self, organization_id: &str, family: ResourceFamily) {
        self.store
            .set(&fetched_at_key(organization_id, family), now_ms().to_string());
    }

    /// Stamp the family inside a running script
    pub fn reset_in(&self, txn: &mut StoreTxn<'_>, organization_id: &str, family: ResourceFamily) {
        txn.set(&fetched_at_key(organization_id, family), now_ms().to_string());
    }

    pub fn is_stale(&self, organization_id: &str, family: ResourceFamily) -> bool {
        let raw = self.store.get(&fetched_at_key(organization_id, family));
        !is_stamp_fresh(raw.as_deref(), now_ms(), self.max_age_ms)
    }

    /// Staleness check inside a running script
    pub fn is_stale_in(
        &self,
        txn: &StoreTxn<'_>,
        organization_id: &str,
        family: ResourceFamily,
    ) -> bool {
        let raw = txn.get(&fetched_at_key(organization_id, family));
        !is_stamp_fresh(raw.as_deref(), now_ms(), self.max_age_ms)
    }
}
