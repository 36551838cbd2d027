//! Typed quota counter accessors over the shared store
//!
//! Two-tier counter model: confirmed usage mirrors the source of truth and
//! is renewed by rehydrates and event deltas; pending usage holds
//! reservations for in-flight operations. Every multi-key mutation runs as
//! one script so the cache can never end up arithmetically inconsistent
//! (cpu updated but memory not).
//!
//! Key layout, documented for operators:
//! - confirmed: `org:{organizationId}:quota:{kind}:usage`
//! - pending:   `org:{organizationId}:pending-{kind}` (cpu, memory, disk only)
//! - stamp:     `org:{organizationId}:resource:{family}:usage:fetched_at`

use std::sync::Arc;
use std::time::Duration;

use crate::config::QuotaCacheConfig;
use crate::core::store::{SharedStore, StoreTxn};
use crate::model::quota::{QuotaKind, ResourceFamily, SandboxResourceTotals};
use crate::service::staleness::StalenessTracker;

/// Store key of a confirmed usage counter
pub fn confirmed_usage_key(organization_id: &str, kind: QuotaKind) -> String {
    format!("org:{}:quota:{}:usage", organization_id, kind.as_str())
}

/// Store key of a pending usage counter
pub fn pending_usage_key(organization_id: &str, kind: QuotaKind) -> String {
    format!("org:{}:pending-{}", organization_id, kind.as_str())
}

/// Confirmed counters parse as non-negative integers; anything else is a
/// cache miss that sends the reader back to the source of truth.
fn parse_confirmed(raw: Option<String>) -> Option<i64> {
    raw?.parse::<i64>().ok().filter(|v| *v >= 0)
}

/// Pending counters clamp below-zero values to zero on read; the write
/// side never floors, the caller's bookkeeping does.
fn parse_pending(raw: Option<String>) -> Option<i64> {
    raw?.parse::<i64>().ok().map(|v| v.max(0))
}

/// Pending reservations as read for the dual view, in cpu/memory/disk order
pub type PendingCounters = [Option<i64>; 3];

/// Typed accessors over the shared store for one deployment's quota cache
#[derive(Clone)]
pub struct QuotaCounterStore {
    store: Arc<SharedStore>,
    staleness: StalenessTracker,
    ttl: Duration,
}

impl QuotaCounterStore {
    pub fn new(store: Arc<SharedStore>, config: &QuotaCacheConfig) -> Self {
        let staleness = StalenessTracker::new(Arc::clone(&store), config.cache_max_age_ms);
        Self {
            store,
            staleness,
            ttl: config.cache_ttl(),
        }
    }

    /// Read one confirmed counter. `None` means absent or invalid; the
    /// staleness clock is not consulted here, family reads do that.
    pub fn get(&self, organization_id: &str, kind: QuotaKind) -> Option<i64> {
        parse_confirmed(self.store.get(&confirmed_usage_key(organization_id, kind)))
    }

    /// Read a whole family of confirmed counters, in [`ResourceFamily::kinds`]
    /// order. Misses when the family is stale or any counter is absent or
    /// invalid; staleness and values are checked in one script.
    pub fn read_confirmed(
        &self,
        organization_id: &str,
        family: ResourceFamily,
    ) -> Option<Vec<i64>> {
        self.store.atomically(|t| {
            if self.staleness.is_stale_in(t, organization_id, family) {
                return None;
            }
            family
                .kinds()
                .iter()
                .map(|kind| parse_confirmed(t.get(&confirmed_usage_key(organization_id, *kind))))
                .collect()
        })
    }

    /// Cached sandbox totals, or a miss per [`read_confirmed`]
    pub fn read_sandbox_totals(&self, organization_id: &str) -> Option<SandboxResourceTotals> {
        let values = self.read_confirmed(organization_id, ResourceFamily::Sandbox)?;
        Some(SandboxResourceTotals {
            cpu: values[0],
            mem: values[1],
            disk: values[2],
        })
    }

    /// Cached count for a counting family, or a miss per [`read_confirmed`]
    pub fn read_count(&self, organization_id: &str, family: ResourceFamily) -> Option<i64> {
        self.read_confirmed(organization_id, family)
            .map(|values| values[0])
    }

    /// The three pending sandbox counters, read in one script
    pub fn read_pending(&self, organization_id: &str) -> PendingCounters {
        self.store
            .atomically(|t| Self::pending_in(t, organization_id))
    }

    /// All six sandbox-family keys plus the staleness stamp in one script,
    /// so one view can never observe a torn combination. `None` means the
    /// confirmed side missed; pending alone is not a view.
    pub fn read_sandbox_with_pending(
        &self,
        organization_id: &str,
    ) -> Option<(SandboxResourceTotals, PendingCounters)> {
        self.store.atomically(|t| {
            if self
                .staleness
                .is_stale_in(t, organization_id, ResourceFamily::Sandbox)
            {
                return None;
            }

            let cpu = parse_confirmed(t.get(&confirmed_usage_key(organization_id, QuotaKind::Cpu)))?;
            let mem =
                parse_confirmed(t.get(&confirmed_usage_key(organization_id, QuotaKind::Memory)))?;
            let disk =
                parse_confirmed(t.get(&confirmed_usage_key(organization_id, QuotaKind::Disk)))?;

            Some((
                SandboxResourceTotals { cpu, mem, disk },
                Self::pending_in(t, organization_id),
            ))
        })
    }

    fn pending_in(t: &StoreTxn<'_>, organization_id: &str) -> PendingCounters {
        [QuotaKind::Cpu, QuotaKind::Memory, QuotaKind::Disk]
            .map(|kind| parse_pending(t.get(&pending_usage_key(organization_id, kind))))
    }

    /// Write a freshly fetched family: every confirmed key set with TTL,
    /// then the family stamped, all in one script.
    pub fn set_rehydrated(
        &self,
        organization_id: &str,
        values: &[(QuotaKind, i64)],
        family: ResourceFamily,
    ) {
        self.store.atomically(|t| {
            for (kind, value) in values {
                t.set_ex(
                    &confirmed_usage_key(organization_id, *kind),
                    value.to_string(),
                    self.ttl,
                );
            }
            self.staleness.reset_in(t, organization_id, family);
        });
    }

    /// Apply signed sandbox deltas from one lifecycle event in one script.
    ///
    /// Confirmed counters are incremented and their TTL refreshed only if
    /// they are live; an evicted counter is never resurrected from a delta
    /// because it would not include the organization's other entities.
    /// Positive deltas additionally settle the matching pending counter by
    /// `min(pending, delta)`, so a reservation made ahead of the event
    /// flows into confirmed usage instead of double-counting. Settlement
    /// happens even when the confirmed key is absent: the entity is in the
    /// database now, and the next rehydrate will count it.
    pub fn apply_sandbox_deltas(&self, organization_id: &str, deltas: &[(QuotaKind, i64)]) {
        self.store.atomically(|t| {
            for (kind, delta) in deltas {
                if *delta == 0 {
                    continue;
                }

                let confirmed_key = confirmed_usage_key(organization_id, *kind);
                if t.incr_by(&confirmed_key, *delta).is_some() {
                    t.expire(&confirmed_key, self.ttl);
                }

                // Only sandbox-family kinds carry a pending tier
                if *delta > 0 && kind.family() == ResourceFamily::Sandbox {
                    let pending_key = pending_usage_key(organization_id, *kind);
                    if let Some(pending) = parse_pending(t.get(&pending_key)) {
                        let settled = pending.min(*delta);
                        if settled > 0 {
                            t.incr_by(&pending_key, -settled);
                        }
                    }
                }
            }
        });
    }

    /// Apply a signed delta to a counting-family counter. Same no-resurrect
    /// rule as sandbox deltas; counting kinds carry no pending tier.
    pub fn apply_count_delta(&self, organization_id: &str, kind: QuotaKind, delta: i64) {
        if delta == 0 {
            return;
        }
        self.store.atomically(|t| {
            let key = confirmed_usage_key(organization_id, kind);
            if t.incr_by(&key, delta).is_some() {
                t.expire(&key, self.ttl);
            }
        });
    }

    /// Reserve headroom: increment each selected pending counter and
    /// refresh its TTL, creating it when absent. Returns the new values in
    /// input order.
    pub fn increment_pending(
        &self,
        organization_id: &str,
        amounts: &[(QuotaKind, i64)],
    ) -> Vec<i64> {
        self.store.atomically(|t| {
            amounts
                .iter()
                .map(|(kind, amount)| {
                    let key = pending_usage_key(organization_id, *kind);
                    let updated = match t.incr_by(&key, *amount) {
                        Some(value) => value,
                        None => {
                            t.set_ex(&key, amount.to_string(), self.ttl);
                            *amount
                        }
                    };
                    t.expire(&key, self.ttl);
                    updated
                })
                .collect()
        })
    }

    /// Release a reservation: decrement each selected pending counter.
    /// Absent counters are left absent and TTLs are not refreshed, so a
    /// rollback cannot extend a reservation's lifetime or materialize a
    /// bare negative counter.
    pub fn decrement_pending(&self, organization_id: &str, amounts: &[(QuotaKind, i64)]) {
        self.store.atomically(|t| {
            for (kind, amount) in amounts {
                t.incr_by(&pending_usage_key(organization_id, *kind), -amount);
            }
        });
    }
}
