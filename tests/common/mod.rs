#![allow(dead_code)] // Each integration test binary uses a subset of the fixture

//! Shared test fixtures
//!
//! An in-memory [`UsageSource`] aggregating over plain maps with the same
//! formulas as the database adapter, plus builders for entity rows. Fetch
//! calls are counted so tests can assert whether a read was served from
//! cache or went back to the source of truth.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use cabana_quota::entity::organization;
use cabana_quota::{
    SandboxState, SandboxUsageProjection, SandboxResourceTotals, SnapshotState,
    SnapshotUsageProjection, UsageSource, VolumeState, VolumeUsageProjection,
};

#[derive(Default)]
pub struct InMemoryUsageSource {
    pub organizations: Mutex<HashMap<String, organization::Model>>,
    pub sandboxes: Mutex<HashMap<String, SandboxUsageProjection>>,
    pub snapshots: Mutex<HashMap<String, SnapshotUsageProjection>>,
    pub volumes: Mutex<HashMap<String, VolumeUsageProjection>>,
    pub sandbox_fetches: AtomicUsize,
    pub snapshot_fetches: AtomicUsize,
    pub volume_fetches: AtomicUsize,
}

impl InMemoryUsageSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_organization(&self, org: organization::Model) {
        self.organizations.lock().insert(org.id.clone(), org);
    }

    pub fn put_sandbox(&self, sandbox: SandboxUsageProjection) {
        self.sandboxes.lock().insert(sandbox.id.clone(), sandbox);
    }

    pub fn set_sandbox_state(&self, sandbox_id: &str, state: SandboxState) {
        if let Some(sandbox) = self.sandboxes.lock().get_mut(sandbox_id) {
            sandbox.state = state;
        }
    }

    pub fn put_snapshot(&self, snapshot: SnapshotUsageProjection) {
        self.snapshots.lock().insert(snapshot.id.clone(), snapshot);
    }

    pub fn put_volume(&self, volume: VolumeUsageProjection) {
        self.volumes.lock().insert(volume.id.clone(), volume);
    }

    pub fn sandbox_fetch_count(&self) -> usize {
        self.sandbox_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageSource for InMemoryUsageSource {
    async fn fetch_sandbox_usage(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<SandboxResourceTotals> {
        self.sandbox_fetches.fetch_add(1, Ordering::SeqCst);

        let mut totals = SandboxResourceTotals::default();
        for sandbox in self.sandboxes.lock().values() {
            if sandbox.organization_id != organization_id {
                continue;
            }
            if sandbox.state.consumes_compute() {
                totals.cpu += sandbox.cpu;
                totals.mem += sandbox.mem;
            }
            if sandbox.state.consumes_disk() {
                totals.disk += sandbox.disk;
            }
        }
        Ok(totals)
    }

    async fn fetch_snapshot_count(&self, organization_id: &str) -> anyhow::Result<i64> {
        self.snapshot_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .snapshots
            .lock()
            .values()
            .filter(|s| s.organization_id == organization_id && s.state.counts_toward_usage())
            .count() as i64)
    }

    async fn fetch_volume_count(&self, organization_id: &str) -> anyhow::Result<i64> {
        self.volume_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .volumes
            .lock()
            .values()
            .filter(|v| v.organization_id == organization_id && v.state.counts_toward_usage())
            .count() as i64)
    }

    async fn find_organization(
        &self,
        organization_id: &str,
    ) -> anyhow::Result<Option<organization::Model>> {
        Ok(self.organizations.lock().get(organization_id).cloned())
    }

    async fn find_sandbox(
        &self,
        sandbox_id: &str,
    ) -> anyhow::Result<Option<SandboxUsageProjection>> {
        Ok(self.sandboxes.lock().get(sandbox_id).cloned())
    }
}

pub fn organization_row(id: &str) -> organization::Model {
    let now = chrono::Utc::now().naive_utc();
    organization::Model {
        id: id.to_string(),
        name: format!("{} team", id),
        total_cpu_quota: 100,
        total_memory_quota: 200,
        total_disk_quota: 1000,
        snapshot_quota: 20,
        volume_quota: 10,
        created_at: now,
        updated_at: now,
    }
}

pub fn sandbox_row(
    id: &str,
    organization_id: &str,
    state: SandboxState,
    cpu: i64,
    mem: i64,
    disk: i64,
) -> SandboxUsageProjection {
    SandboxUsageProjection {
        id: id.to_string(),
        organization_id: organization_id.to_string(),
        state,
        cpu,
        mem,
        disk,
    }
}

pub fn snapshot_row(id: &str, organization_id: &str, state: SnapshotState) -> SnapshotUsageProjection {
    SnapshotUsageProjection {
        id: id.to_string(),
        organization_id: organization_id.to_string(),
        state,
    }
}

pub fn volume_row(id: &str, organization_id: &str, state: VolumeState) -> VolumeUsageProjection {
    VolumeUsageProjection {
        id: id.to_string(),
        organization_id: organization_id.to_string(),
        state,
    }
}
