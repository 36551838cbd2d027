//! Entity lifecycle states and the consume-sets that drive usage accounting
//!
//! A sandbox contributes cpu and memory while its state is in
//! [`SANDBOX_STATES_CONSUMING_COMPUTE`] and disk while in
//! [`SANDBOX_STATES_CONSUMING_DISK`]. Snapshots and volumes count toward
//! their organization's totals unless their state is in the family's
//! ignored set.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle states of a sandbox
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Creating,
    Restoring,
    Starting,
    Started,
    Stopping,
    Stopped,
    Archiving,
    Archived,
    Destroying,
    Destroyed,
    Error,
}

/// Sandbox states in which cpu and memory are held on a runner
pub const SANDBOX_STATES_CONSUMING_COMPUTE: &[SandboxState] = &[
    SandboxState::Creating,
    SandboxState::Restoring,
    SandboxState::Starting,
    SandboxState::Started,
    SandboxState::Stopping,
];

/// Sandbox states in which disk is held. Stopped sandboxes no longer hold
/// compute but their filesystem stays on the runner until archived or
/// destroyed, so this is a superset of the compute set.
pub const SANDBOX_STATES_CONSUMING_DISK: &[SandboxState] = &[
    SandboxState::Creating,
    SandboxState::Restoring,
    SandboxState::Starting,
    SandboxState::Started,
    SandboxState::Stopping,
    SandboxState::Stopped,
    SandboxState::Archiving,
];

impl SandboxState {
    pub fn as_str(self) -> &'static str {
        match self {
            SandboxState::Creating => "creating",
            SandboxState::Restoring => "restoring",
            SandboxState::Starting => "starting",
            SandboxState::Started => "started",
            SandboxState::Stopping => "stopping",
            SandboxState::Stopped => "stopped",
            SandboxState::Archiving => "archiving",
            SandboxState::Archived => "archived",
            SandboxState::Destroying => "destroying",
            SandboxState::Destroyed => "destroyed",
            SandboxState::Error => "error",
        }
    }

    pub fn consumes_compute(self) -> bool {
        SANDBOX_STATES_CONSUMING_COMPUTE.contains(&self)
    }

    pub fn consumes_disk(self) -> bool {
        SANDBOX_STATES_CONSUMING_DISK.contains(&self)
    }
}

impl Display for SandboxState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SandboxState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(SandboxState::Creating),
            "restoring" => Ok(SandboxState::Restoring),
            "starting" => Ok(SandboxState::Starting),
            "started" => Ok(SandboxState::Started),
            "stopping" => Ok(SandboxState::Stopping),
            "stopped" => Ok(SandboxState::Stopped),
            "archiving" => Ok(SandboxState::Archiving),
            "archived" => Ok(SandboxState::Archived),
            "destroying" => Ok(SandboxState::Destroying),
            "destroyed" => Ok(SandboxState::Destroyed),
            "error" => Ok(SandboxState::Error),
            _ => Err(format!("unknown sandbox state: {}", s)),
        }
    }
}

/// Lifecycle states of a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    Pending,
    Building,
    Active,
    Error,
    Removing,
    Deleted,
}

/// Snapshot states that do not count toward `snapshot_count`
pub const SNAPSHOT_USAGE_IGNORED_STATES: &[SnapshotState] =
    &[SnapshotState::Error, SnapshotState::Deleted];

impl SnapshotState {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotState::Pending => "pending",
            SnapshotState::Building => "building",
            SnapshotState::Active => "active",
            SnapshotState::Error => "error",
            SnapshotState::Removing => "removing",
            SnapshotState::Deleted => "deleted",
        }
    }

    /// The consume-set for counting quotas is the complement of the ignored set
    pub fn counts_toward_usage(self) -> bool {
        !SNAPSHOT_USAGE_IGNORED_STATES.contains(&self)
    }
}

impl Display for SnapshotState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SnapshotState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SnapshotState::Pending),
            "building" => Ok(SnapshotState::Building),
            "active" => Ok(SnapshotState::Active),
            "error" => Ok(SnapshotState::Error),
            "removing" => Ok(SnapshotState::Removing),
            "deleted" => Ok(SnapshotState::Deleted),
            _ => Err(format!("unknown snapshot state: {}", s)),
        }
    }
}

/// Lifecycle states of a volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeState {
    Creating,
    Ready,
    Deleting,
    Deleted,
    Error,
}

/// Volume states that do not count toward `volume_count`
pub const VOLUME_USAGE_IGNORED_STATES: &[VolumeState] =
    &[VolumeState::Deleted, VolumeState::Error];

impl VolumeState {
    pub fn as_str(self) -> &'static str {
        match self {
            VolumeState::Creating => "creating",
            VolumeState::Ready => "ready",
            VolumeState::Deleting => "deleting",
            VolumeState::Deleted => "deleted",
            VolumeState::Error => "error",
        }
    }

    pub fn counts_toward_usage(self) -> bool {
        !VOLUME_USAGE_IGNORED_STATES.contains(&self)
    }
}

impl Display for VolumeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VolumeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(VolumeState::Creating),
            "ready" => Ok(VolumeState::Ready),
            "deleting" => Ok(VolumeState::Deleting),
            "deleted" => Ok(VolumeState::Deleted),
            "error" => Ok(VolumeState::Error),
            _ => Err(format!("unknown volume state: {}", s)),
        }
    }
}

/// Signed usage delta for a state transition against a consume predicate.
///
/// Entering the consume-set contributes `+amount`, leaving it `-amount`,
/// and a transition that stays on the same side contributes nothing. The
/// helper is parametric in the state type; the same function serves
/// sandboxes against either consume-set and snapshots/volumes against the
/// complement of their ignored set.
pub fn calculate_delta<S, F>(amount: i64, old_state: S, new_state: S, consumes: F) -> i64
where
    F: Fn(&S) -> bool,
{
    let was_consuming = consumes(&old_state);
    let is_consuming = consumes(&new_state);

    if was_consuming == is_consuming {
        0
    } else if is_consuming {
        amount
    } else {
        -amount
    }
}
