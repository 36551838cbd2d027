//! Lifecycle event subscriber maintaining the quota counters
//!
//! Consumes created/state-updated events for sandboxes, snapshots and
//! volumes, computes signed deltas against the consume-sets and applies
//! them through the counter store. Handlers serialize per entity behind a
//! named lock so two near-simultaneous transitions of the same entity
//! cannot double-count against an intermediate state. Failures are logged
//! and swallowed: a drifted counter is re-anchored by the staleness
//! deadline, while a failed event handler must never fail the lifecycle
//! operation that emitted it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::QuotaCacheConfig;
use crate::core::lock::LockService;
use crate::core::store::SharedStore;
use crate::error::QuotaError;
use crate::model::event::UsageEvent;
use crate::model::quota::{QuotaKind, ResourceFamily};
use crate::model::state::calculate_delta;
use crate::service::counter::QuotaCounterStore;

/// Lock key serializing usage updates of one entity
fn entity_update_lock_key(family: ResourceFamily, entity_id: &str) -> String {
    format!("{}:{}:quota-usage-update", family.as_str(), entity_id)
}

/// Applies usage deltas from the platform's lifecycle event feed
#[derive(Clone)]
pub struct UsageEventSink {
    counters: QuotaCounterStore,
    locks: LockService,
    lock_ttl: Duration,
}

impl UsageEventSink {
    pub fn new(store: Arc<SharedStore>, config: &QuotaCacheConfig) -> Self {
        let counters = QuotaCounterStore::new(Arc::clone(&store), config);
        let locks = LockService::new(store, config.lock_wait_timeout());
        Self {
            counters,
            locks,
            lock_ttl: config.lock_ttl(),
        }
    }

    /// Subscription loop; the host platform spawns this with a receiver
    /// on its event feed. A lagged receiver is logged and skipped: the
    /// staleness deadline bounds the resulting drift.
    pub async fn run(self, mut events: broadcast::Receiver<UsageEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle(event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(
                        missed = missed,
                        "Usage event feed lagged; counters re-anchor at the staleness deadline"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Apply one event. Errors are logged at WARN and swallowed.
    pub async fn handle(&self, event: UsageEvent) {
        let organization_id = event.organization_id().to_string();
        let entity_id = event.entity_id().to_string();

        if let Err(err) = self.apply(event).await {
            warn!(
                organization_id = %organization_id,
                entity_id = %entity_id,
                error = %err,
                "Failed to apply usage delta"
            );
        }
    }

    /// Compute the event's signed deltas and apply the non-zero ones under
    /// the entity's lock. A usage-neutral event writes nothing, not even
    /// the lock key.
    async fn apply(&self, event: UsageEvent) -> Result<(), QuotaError> {
        let deltas = event_deltas(&event);
        if deltas.is_empty() {
            debug!(entity_id = %event.entity_id(), "Event is usage-neutral");
            return Ok(());
        }

        let family = event.family();
        let lock_key = entity_update_lock_key(family, event.entity_id());
        let token = self.locks.wait_for_lock(&lock_key, self.lock_ttl).await?;
        match family {
            ResourceFamily::Sandbox => self
                .counters
                .apply_sandbox_deltas(event.organization_id(), &deltas),
            ResourceFamily::Snapshot | ResourceFamily::Volume => {
                let (kind, delta) = deltas[0];
                self.counters
                    .apply_count_delta(event.organization_id(), kind, delta);
            }
        }
        self.locks.unlock(&token);
        Ok(())
    }
}

/// Signed per-kind deltas of one lifecycle event. A newly created entity
/// is assumed to be in a consuming state and contributes unconditionally;
/// state updates contribute per consume-set membership, and a transition
/// with `old == new` contributes nothing.
fn event_deltas(event: &UsageEvent) -> Vec<(QuotaKind, i64)> {
    match event {
        UsageEvent::SandboxCreated(sandbox) => vec![
            (QuotaKind::Cpu, sandbox.cpu),
            (QuotaKind::Memory, sandbox.mem),
            (QuotaKind::Disk, sandbox.disk),
        ],
        UsageEvent::SandboxStateUpdated {
            sandbox,
            old_state,
            new_state,
        } => {
            if old_state == new_state {
                return Vec::new();
            }
            [
                (
                    QuotaKind::Cpu,
                    calculate_delta(sandbox.cpu, *old_state, *new_state, |s| {
                        s.consumes_compute()
                    }),
                ),
                (
                    QuotaKind::Memory,
                    calculate_delta(sandbox.mem, *old_state, *new_state, |s| {
                        s.consumes_compute()
                    }),
                ),
                (
                    QuotaKind::Disk,
                    calculate_delta(sandbox.disk, *old_state, *new_state, |s| s.consumes_disk()),
                ),
            ]
            .into_iter()
            .filter(|(_, delta)| *delta != 0)
            .collect()
        }
        UsageEvent::SnapshotCreated(_) => vec![(QuotaKind::SnapshotCount, 1)],
        UsageEvent::SnapshotStateUpdated {
            old_state,
            new_state,
            ..
        } => {
            if old_state == new_state {
                return Vec::new();
            }
            let delta = calculate_delta(1, *old_state, *new_state, |s| s.counts_toward_usage());
            if delta == 0 {
                Vec::new()
            } else {
                vec![(QuotaKind::SnapshotCount, delta)]
            }
        }
        UsageEvent::VolumeCreated(_) => vec![(QuotaKind::VolumeCount, 1)],
        UsageEvent::VolumeStateUpdated {
            old_state,
            new_state,
            ..
        } => {
            if old_state == new_state {
                return Vec::new();
            }
            let delta = calculate_delta(1, *old_state, *new_state, |s| s.counts_toward_usage());
            if delta == 0 {
                Vec::new()
            } else {
                vec![(QuotaKind::VolumeCount, delta)]
            }
        }
    }
}
