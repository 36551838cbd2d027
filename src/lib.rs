// Organization quota-usage accounting core for the Cabana sandbox platform
// Cached, event-driven, lock-coordinated quota ledger with a two-tier
// counter model: confirmed usage mirrors the source of truth, pending
// counters hold reservations for in-flight operations

// Module declarations
pub mod config; // Injected cache and lock configuration
pub mod core; // Shared store and distributed locks
pub mod entity; // Database entities (read-only projections)
pub mod error; // Error handling and types
pub mod model; // Data models, states, events and DTOs
pub mod service; // Business services

pub use crate::config::QuotaCacheConfig;
pub use crate::core::lock::{LockService, LockToken};
pub use crate::core::store::SharedStore;
pub use crate::error::QuotaError;
pub use crate::model::event::{
    SandboxUsageProjection, SnapshotUsageProjection, UsageEvent, VolumeUsageProjection,
};
pub use crate::model::quota::{
    OrganizationUsageOverview, PendingSandboxUsageIncrement, QuotaCheckResult, QuotaKind,
    ResourceFamily, SandboxResourceTotals, SandboxUsageOverview, SandboxUsageOverviewWithPending,
    SnapshotUsageOverview, VolumeUsageOverview,
};
pub use crate::model::state::{SandboxState, SnapshotState, VolumeState, calculate_delta};
pub use crate::service::counter::QuotaCounterStore;
pub use crate::service::event_sink::UsageEventSink;
pub use crate::service::source::{DatabaseUsageSource, UsageSource};
pub use crate::service::staleness::StalenessTracker;
pub use crate::service::usage::UsageService;
