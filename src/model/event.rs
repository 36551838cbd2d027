//! Lifecycle events consumed by the usage event sink
//!
//! Events carry the snapshot of the entity relevant to its family.
//! State-update events always carry both the old and the new state so the
//! sink can compute a signed delta without another database read.

use serde::{Deserialize, Serialize};

use crate::model::quota::ResourceFamily;
use crate::model::state::{SandboxState, SnapshotState, VolumeState};

/// Sandbox projection carried on sandbox lifecycle events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxUsageProjection {
    pub id: String,
    pub organization_id: String,
    pub state: SandboxState,
    pub cpu: i64,
    pub mem: i64,
    pub disk: i64,
}

/// Snapshot projection carried on snapshot lifecycle events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotUsageProjection {
    pub id: String,
    pub organization_id: String,
    pub state: SnapshotState,
}

/// Volume projection carried on volume lifecycle events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeUsageProjection {
    pub id: String,
    pub organization_id: String,
    pub state: VolumeState,
}

/// Lifecycle events of the three quota-bearing entity families
#[derive(Clone, Debug, PartialEq)]
pub enum UsageEvent {
    SandboxCreated(SandboxUsageProjection),
    SandboxStateUpdated {
        sandbox: SandboxUsageProjection,
        old_state: SandboxState,
        new_state: SandboxState,
    },
    SnapshotCreated(SnapshotUsageProjection),
    SnapshotStateUpdated {
        snapshot: SnapshotUsageProjection,
        old_state: SnapshotState,
        new_state: SnapshotState,
    },
    VolumeCreated(VolumeUsageProjection),
    VolumeStateUpdated {
        volume: VolumeUsageProjection,
        old_state: VolumeState,
        new_state: VolumeState,
    },
}

impl UsageEvent {
    pub fn sandbox_created(sandbox: SandboxUsageProjection) -> Self {
        UsageEvent::SandboxCreated(sandbox)
    }

    pub fn sandbox_state_updated(
        sandbox: SandboxUsageProjection,
        old_state: SandboxState,
        new_state: SandboxState,
    ) -> Self {
        UsageEvent::SandboxStateUpdated {
            sandbox,
            old_state,
            new_state,
        }
    }

    pub fn snapshot_created(snapshot: SnapshotUsageProjection) -> Self {
        UsageEvent::SnapshotCreated(snapshot)
    }

    pub fn snapshot_state_updated(
        snapshot: SnapshotUsageProjection,
        old_state: SnapshotState,
        new_state: SnapshotState,
    ) -> Self {
        UsageEvent::SnapshotStateUpdated {
            snapshot,
            old_state,
            new_state,
        }
    }

    pub fn volume_created(volume: VolumeUsageProjection) -> Self {
        UsageEvent::VolumeCreated(volume)
    }

    pub fn volume_state_updated(
        volume: VolumeUsageProjection,
        old_state: VolumeState,
        new_state: VolumeState,
    ) -> Self {
        UsageEvent::VolumeStateUpdated {
            volume,
            old_state,
            new_state,
        }
    }

    /// Organization owning the entity the event is about
    pub fn organization_id(&self) -> &str {
        match self {
            UsageEvent::SandboxCreated(s) => &s.organization_id,
            UsageEvent::SandboxStateUpdated { sandbox, .. } => &sandbox.organization_id,
            UsageEvent::SnapshotCreated(s) => &s.organization_id,
            UsageEvent::SnapshotStateUpdated { snapshot, .. } => &snapshot.organization_id,
            UsageEvent::VolumeCreated(v) => &v.organization_id,
            UsageEvent::VolumeStateUpdated { volume, .. } => &volume.organization_id,
        }
    }

    /// Id of the entity the event is about
    pub fn entity_id(&self) -> &str {
        match self {
            UsageEvent::SandboxCreated(s) => &s.id,
            UsageEvent::SandboxStateUpdated { sandbox, .. } => &sandbox.id,
            UsageEvent::SnapshotCreated(s) => &s.id,
            UsageEvent::SnapshotStateUpdated { snapshot, .. } => &snapshot.id,
            UsageEvent::VolumeCreated(v) => &v.id,
            UsageEvent::VolumeStateUpdated { volume, .. } => &volume.id,
        }
    }

    /// Family of the entity the event is about
    pub fn family(&self) -> ResourceFamily {
        match self {
            UsageEvent::SandboxCreated(_) | UsageEvent::SandboxStateUpdated { .. } => {
                ResourceFamily::Sandbox
            }
            UsageEvent::SnapshotCreated(_) | UsageEvent::SnapshotStateUpdated { .. } => {
                ResourceFamily::Snapshot
            }
            UsageEvent::VolumeCreated(_) | UsageEvent::VolumeStateUpdated { .. } => {
                ResourceFamily::Volume
            }
        }
    }
}
