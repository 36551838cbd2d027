//! Usage overview façade
//!
//! Public read/reserve surface of the accounting core. Every read follows
//! the same shape: cached value if the family is live and fresh, otherwise
//! take the per-family rehydrate lock, re-check (another replica may have
//! rehydrated while we waited), and only then aggregate from the source of
//! truth and write the family through. On lock timeout the caller still
//! gets a correct answer from a direct read; it is just not cached.

use std::sync::Arc;

use tracing::warn;

use crate::config::QuotaCacheConfig;
use crate::core::lock::LockService;
use crate::core::store::SharedStore;
use crate::entity::organization;
use crate::error::QuotaError;
use crate::model::quota::{
    OrganizationUsageOverview, PendingSandboxUsageIncrement, QuotaCheckResult, QuotaKind,
    ResourceFamily, SandboxResourceTotals, SandboxUsageOverview, SandboxUsageOverviewWithPending,
    SnapshotUsageOverview, VolumeUsageOverview,
};
use crate::service::counter::QuotaCounterStore;
use crate::service::source::UsageSource;

/// Lock key serializing rehydrates of one organization's family
fn fetch_lock_key(organization_id: &str, family: ResourceFamily) -> String {
    format!(
        "org:{}:fetch-{}-usage-from-db",
        organization_id,
        family.as_str()
    )
}

/// Cached, event-maintained view of per-organization quota usage
#[derive(Clone)]
pub struct UsageService {
    counters: QuotaCounterStore,
    locks: LockService,
    source: Arc<dyn UsageSource>,
    config: QuotaCacheConfig,
}

impl UsageService {
    pub fn new(
        store: Arc<SharedStore>,
        source: Arc<dyn UsageSource>,
        config: QuotaCacheConfig,
    ) -> Self {
        let counters = QuotaCounterStore::new(Arc::clone(&store), &config);
        let locks = LockService::new(store, config.lock_wait_timeout());
        Self {
            counters,
            locks,
            source,
            config,
        }
    }

    /// Organization quota limits merged with current usage for all three
    /// families. A supplied organization model skips the lookup but must
    /// carry the requested id.
    pub async fn get_usage_overview(
        &self,
        organization_id: &str,
        organization: Option<&organization::Model>,
    ) -> Result<OrganizationUsageOverview, QuotaError> {
        let org = match organization {
            Some(org) if org.id != organization_id => {
                return Err(QuotaError::OrganizationMismatch {
                    expected: organization_id.to_string(),
                    actual: org.id.clone(),
                });
            }
            Some(org) => org.clone(),
            None => self
                .source
                .find_organization(organization_id)
                .await?
                .ok_or_else(|| QuotaError::OrganizationNotFound(organization_id.to_string()))?,
        };

        let (sandbox, snapshots, volumes) = tokio::try_join!(
            self.get_sandbox_usage_overview(organization_id, None),
            self.get_snapshot_usage_overview(organization_id),
            self.get_volume_usage_overview(organization_id),
        )?;

        Ok(OrganizationUsageOverview {
            organization_id: organization_id.to_string(),
            total_cpu_quota: org.total_cpu_quota,
            total_memory_quota: org.total_memory_quota,
            total_disk_quota: org.total_disk_quota,
            snapshot_quota: org.snapshot_quota,
            volume_quota: org.volume_quota,
            current_cpu_usage: sandbox.current_cpu_usage,
            current_memory_usage: sandbox.current_memory_usage,
            current_disk_usage: sandbox.current_disk_usage,
            current_snapshot_usage: snapshots.current_snapshot_usage,
            current_volume_usage: volumes.current_volume_usage,
        })
    }

    /// Confirmed sandbox usage, optionally with one sandbox's contribution
    /// removed as if it consumed nothing
    pub async fn get_sandbox_usage_overview(
        &self,
        organization_id: &str,
        exclude_sandbox_id: Option<&str>,
    ) -> Result<SandboxUsageOverview, QuotaError> {
        let mut totals = self.sandbox_usage(organization_id).await?;
        if let Some(sandbox_id) = exclude_sandbox_id {
            totals = self.exclude_sandbox(totals, sandbox_id).await?;
        }
        Ok(totals.into())
    }

    pub async fn get_snapshot_usage_overview(
        &self,
        organization_id: &str,
    ) -> Result<SnapshotUsageOverview, QuotaError> {
        Ok(SnapshotUsageOverview {
            current_snapshot_usage: self
                .count_usage(organization_id, ResourceFamily::Snapshot)
                .await?,
        })
    }

    pub async fn get_volume_usage_overview(
        &self,
        organization_id: &str,
    ) -> Result<VolumeUsageOverview, QuotaError> {
        Ok(VolumeUsageOverview {
            current_volume_usage: self
                .count_usage(organization_id, ResourceFamily::Volume)
                .await?,
        })
    }

    /// The dual (confirmed, pending) sandbox view. The cache path reads
    /// all six keys in one script so the view is never torn. Exclusion
    /// adjusts only the confirmed side; a reservation is not an entity and
    /// cannot be excluded.
    pub async fn get_sandbox_usage_overview_with_pending(
        &self,
        organization_id: &str,
        exclude_sandbox_id: Option<&str>,
    ) -> Result<SandboxUsageOverviewWithPending, QuotaError> {
        let (mut totals, pending) = match self.counters.read_sandbox_with_pending(organization_id) {
            Some(view) => view,
            None => {
                let totals = self.rehydrate_sandbox(organization_id).await?;
                (totals, self.counters.read_pending(organization_id))
            }
        };

        if let Some(sandbox_id) = exclude_sandbox_id {
            totals = self.exclude_sandbox(totals, sandbox_id).await?;
        }

        Ok(SandboxUsageOverviewWithPending {
            current_cpu_usage: totals.cpu,
            current_memory_usage: totals.mem,
            current_disk_usage: totals.disk,
            pending_cpu_usage: pending[0],
            pending_memory_usage: pending[1],
            pending_disk_usage: pending[2],
        })
    }

    /// Reserve headroom for an in-flight sandbox operation. When the
    /// operation updates an existing sandbox whose current state already
    /// consumes a kind, that kind is skipped: its resources are already in
    /// the confirmed counters. The returned flags say which kinds were
    /// reserved so a rollback can decrement exactly those.
    pub async fn increment_pending_sandbox_usage(
        &self,
        organization_id: &str,
        cpu: i64,
        mem: i64,
        disk: i64,
        exclude_sandbox_id: Option<&str>,
    ) -> Result<PendingSandboxUsageIncrement, QuotaError> {
        let excluded = match exclude_sandbox_id {
            Some(sandbox_id) => self.source.find_sandbox(sandbox_id).await?,
            None => None,
        };

        let already_compute = excluded
            .as_ref()
            .is_some_and(|sb| sb.state.consumes_compute());
        let already_disk = excluded.as_ref().is_some_and(|sb| sb.state.consumes_disk());

        let mut amounts = Vec::with_capacity(3);
        if !already_compute {
            amounts.push((QuotaKind::Cpu, cpu));
            amounts.push((QuotaKind::Memory, mem));
        }
        if !already_disk {
            amounts.push((QuotaKind::Disk, disk));
        }
        if !amounts.is_empty() {
            self.counters.increment_pending(organization_id, &amounts);
        }

        Ok(PendingSandboxUsageIncrement {
            cpu_incremented: !already_compute,
            memory_incremented: !already_compute,
            disk_incremented: !already_disk,
        })
    }

    /// Release a reservation. Only the supplied kinds are decremented;
    /// callers pass back exactly what the increment reported.
    pub async fn decrement_pending_sandbox_usage(
        &self,
        organization_id: &str,
        cpu: Option<i64>,
        mem: Option<i64>,
        disk: Option<i64>,
    ) -> Result<(), QuotaError> {
        let mut amounts = Vec::with_capacity(3);
        if let Some(cpu) = cpu {
            amounts.push((QuotaKind::Cpu, cpu));
        }
        if let Some(mem) = mem {
            amounts.push((QuotaKind::Memory, mem));
        }
        if let Some(disk) = disk {
            amounts.push((QuotaKind::Disk, disk));
        }
        if !amounts.is_empty() {
            self.counters.decrement_pending(organization_id, &amounts);
        }
        Ok(())
    }

    /// Admission pre-check: would the requested sandbox resources fit
    /// under the organization's limits, counting both confirmed usage and
    /// live reservations? First exceeded kind wins.
    pub async fn check_sandbox_quota(
        &self,
        organization: &organization::Model,
        cpu: i64,
        mem: i64,
        disk: i64,
        exclude_sandbox_id: Option<&str>,
    ) -> Result<QuotaCheckResult, QuotaError> {
        let view = self
            .get_sandbox_usage_overview_with_pending(&organization.id, exclude_sandbox_id)
            .await?;

        let projected = [
            (
                QuotaKind::Cpu,
                view.current_cpu_usage + view.pending_cpu_usage.unwrap_or(0) + cpu,
                organization.total_cpu_quota,
            ),
            (
                QuotaKind::Memory,
                view.current_memory_usage + view.pending_memory_usage.unwrap_or(0) + mem,
                organization.total_memory_quota,
            ),
            (
                QuotaKind::Disk,
                view.current_disk_usage + view.pending_disk_usage.unwrap_or(0) + disk,
                organization.total_disk_quota,
            ),
        ];

        for (kind, usage, limit) in projected {
            if usage > limit {
                return Ok(QuotaCheckResult::exceeded(kind, usage, limit));
            }
        }
        Ok(QuotaCheckResult::allowed())
    }

    /// Confirmed sandbox totals: cache hit or rehydrate
    async fn sandbox_usage(
        &self,
        organization_id: &str,
    ) -> Result<SandboxResourceTotals, QuotaError> {
        if let Some(totals) = self.counters.read_sandbox_totals(organization_id) {
            return Ok(totals);
        }
        self.rehydrate_sandbox(organization_id).await
    }

    async fn rehydrate_sandbox(
        &self,
        organization_id: &str,
    ) -> Result<SandboxResourceTotals, QuotaError> {
        let lock_key = fetch_lock_key(organization_id, ResourceFamily::Sandbox);
        match self
            .locks
            .wait_for_lock(&lock_key, self.config.lock_ttl())
            .await
        {
            Ok(token) => {
                let result = self.rehydrate_sandbox_locked(organization_id).await;
                self.locks.unlock(&token);
                result
            }
            Err(QuotaError::LockTimeout(key)) => {
                warn!(
                    organization_id = %organization_id,
                    lock_key = %key,
                    "Rehydrate lock wait timed out; reading source directly without caching"
                );
                Ok(self.source.fetch_sandbox_usage(organization_id).await?)
            }
            Err(err) => Err(err),
        }
    }

    async fn rehydrate_sandbox_locked(
        &self,
        organization_id: &str,
    ) -> Result<SandboxResourceTotals, QuotaError> {
        // Another replica may have rehydrated while we waited on the lock
        if let Some(totals) = self.counters.read_sandbox_totals(organization_id) {
            return Ok(totals);
        }

        let totals = self.source.fetch_sandbox_usage(organization_id).await?;
        self.counters.set_rehydrated(
            organization_id,
            &[
                (QuotaKind::Cpu, totals.cpu),
                (QuotaKind::Memory, totals.mem),
                (QuotaKind::Disk, totals.disk),
            ],
            ResourceFamily::Sandbox,
        );
        Ok(totals)
    }

    /// Confirmed count for a counting family: cache hit or rehydrate
    async fn count_usage(
        &self,
        organization_id: &str,
        family: ResourceFamily,
    ) -> Result<i64, QuotaError> {
        if let Some(count) = self.counters.read_count(organization_id, family) {
            return Ok(count);
        }

        let lock_key = fetch_lock_key(organization_id, family);
        match self
            .locks
            .wait_for_lock(&lock_key, self.config.lock_ttl())
            .await
        {
            Ok(token) => {
                let result = self.count_usage_locked(organization_id, family).await;
                self.locks.unlock(&token);
                result
            }
            Err(QuotaError::LockTimeout(key)) => {
                warn!(
                    organization_id = %organization_id,
                    lock_key = %key,
                    "Rehydrate lock wait timed out; reading source directly without caching"
                );
                Ok(self.fetch_count(organization_id, family).await?)
            }
            Err(err) => Err(err),
        }
    }

    async fn count_usage_locked(
        &self,
        organization_id: &str,
        family: ResourceFamily,
    ) -> Result<i64, QuotaError> {
        if let Some(count) = self.counters.read_count(organization_id, family) {
            return Ok(count);
        }

        let count = self.fetch_count(organization_id, family).await?;
        self.counters
            .set_rehydrated(organization_id, &[(family.kinds()[0], count)], family);
        Ok(count)
    }

    async fn fetch_count(
        &self,
        organization_id: &str,
        family: ResourceFamily,
    ) -> anyhow::Result<i64> {
        match family {
            ResourceFamily::Snapshot => self.source.fetch_snapshot_count(organization_id).await,
            ResourceFamily::Volume => self.source.fetch_volume_count(organization_id).await,
            ResourceFamily::Sandbox => Err(anyhow::anyhow!(
                "sandbox usage is not a counting family"
            )),
        }
    }

    /// Remove one sandbox's contribution from freshly read totals, based
    /// on its current state's membership in the consume-sets. The result
    /// clamps at zero: the cached snapshot and the live projection are not
    /// read in one transaction, so a concurrent transition may briefly
    /// over-subtract.
    async fn exclude_sandbox(
        &self,
        totals: SandboxResourceTotals,
        sandbox_id: &str,
    ) -> Result<SandboxResourceTotals, QuotaError> {
        let Some(sandbox) = self.source.find_sandbox(sandbox_id).await? else {
            return Ok(totals);
        };

        let mut adjusted = totals;
        if sandbox.state.consumes_compute() {
            adjusted.cpu = (adjusted.cpu - sandbox.cpu).max(0);
            adjusted.mem = (adjusted.mem - sandbox.mem).max(0);
        }
        if sandbox.state.consumes_disk() {
            adjusted.disk = (adjusted.disk - sandbox.disk).max(0);
        }
        Ok(adjusted)
    }
}
