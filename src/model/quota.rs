//! Quota kinds, resource families and the usage-overview DTOs

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A named per-organization resource bound
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Cpu,
    Memory,
    Disk,
    SnapshotCount,
    VolumeCount,
}

impl QuotaKind {
    /// Stable identifier used in store key layout
    pub fn as_str(self) -> &'static str {
        match self {
            QuotaKind::Cpu => "cpu",
            QuotaKind::Memory => "memory",
            QuotaKind::Disk => "disk",
            QuotaKind::SnapshotCount => "snapshot_count",
            QuotaKind::VolumeCount => "volume_count",
        }
    }

    /// The family whose staleness clock governs this kind
    pub fn family(self) -> ResourceFamily {
        match self {
            QuotaKind::Cpu | QuotaKind::Memory | QuotaKind::Disk => ResourceFamily::Sandbox,
            QuotaKind::SnapshotCount => ResourceFamily::Snapshot,
            QuotaKind::VolumeCount => ResourceFamily::Volume,
        }
    }
}

impl Display for QuotaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tuple of quota kinds sharing one cache-staleness clock
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceFamily {
    Sandbox,
    Snapshot,
    Volume,
}

impl ResourceFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceFamily::Sandbox => "sandbox",
            ResourceFamily::Snapshot => "snapshot",
            ResourceFamily::Volume => "volume",
        }
    }

    /// The confirmed quota kinds belonging to this family, in key order
    pub fn kinds(self) -> &'static [QuotaKind] {
        match self {
            ResourceFamily::Sandbox => &[QuotaKind::Cpu, QuotaKind::Memory, QuotaKind::Disk],
            ResourceFamily::Snapshot => &[QuotaKind::SnapshotCount],
            ResourceFamily::Volume => &[QuotaKind::VolumeCount],
        }
    }
}

impl Display for ResourceFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Aggregated sandbox resource consumption for one organization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResourceTotals {
    pub cpu: i64,
    pub mem: i64,
    pub disk: i64,
}

/// Confirmed sandbox usage of an organization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxUsageOverview {
    pub current_cpu_usage: i64,
    pub current_memory_usage: i64,
    pub current_disk_usage: i64,
}

impl From<SandboxResourceTotals> for SandboxUsageOverview {
    fn from(totals: SandboxResourceTotals) -> Self {
        Self {
            current_cpu_usage: totals.cpu,
            current_memory_usage: totals.mem,
            current_disk_usage: totals.disk,
        }
    }
}

/// Confirmed sandbox usage plus the organization's pending reservations.
/// A pending field is `None` when no reservation counter is live in cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxUsageOverviewWithPending {
    pub current_cpu_usage: i64,
    pub current_memory_usage: i64,
    pub current_disk_usage: i64,
    pub pending_cpu_usage: Option<i64>,
    pub pending_memory_usage: Option<i64>,
    pub pending_disk_usage: Option<i64>,
}

/// Confirmed snapshot count of an organization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotUsageOverview {
    pub current_snapshot_usage: i64,
}

/// Confirmed volume count of an organization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeUsageOverview {
    pub current_volume_usage: i64,
}

/// Organization quota limits merged with current usage across all families
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationUsageOverview {
    pub organization_id: String,
    pub total_cpu_quota: i64,
    pub total_memory_quota: i64,
    pub total_disk_quota: i64,
    pub snapshot_quota: i64,
    pub volume_quota: i64,
    pub current_cpu_usage: i64,
    pub current_memory_usage: i64,
    pub current_disk_usage: i64,
    pub current_snapshot_usage: i64,
    pub current_volume_usage: i64,
}

/// Which pending kinds an `increment_pending_sandbox_usage` call actually
/// incremented. Callers record this so a rollback decrements exactly the
/// kinds that were reserved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSandboxUsageIncrement {
    pub cpu_incremented: bool,
    pub memory_incremented: bool,
    pub disk_incremented: bool,
}

/// Outcome of an admission pre-check against an organization's limits
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCheckResult {
    /// Whether the requested resources fit under every limit
    pub allowed: bool,
    /// First quota kind that would be exceeded
    pub exceeded_kind: Option<QuotaKind>,
    /// Projected usage (confirmed + pending + requested) for that kind
    pub usage: i64,
    /// The organization's limit for that kind
    pub limit: i64,
}

impl QuotaCheckResult {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            exceeded_kind: None,
            usage: 0,
            limit: 0,
        }
    }

    pub fn exceeded(kind: QuotaKind, usage: i64, limit: i64) -> Self {
        Self {
            allowed: false,
            exceeded_kind: Some(kind),
            usage,
            limit,
        }
    }
}
