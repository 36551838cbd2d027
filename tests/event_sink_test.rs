// Integration tests for the usage event sink
// Verifies delta application on lifecycle transitions, reservation
// settlement, the no-resurrect rule and the broadcast subscription loop

mod common;

use std::sync::Arc;

use tokio::sync::broadcast;

use cabana_quota::service::counter::{confirmed_usage_key, pending_usage_key};
use cabana_quota::{
    QuotaCacheConfig, QuotaKind, SandboxState, SharedStore, SnapshotState, UsageEvent,
    UsageEventSink, UsageService, VolumeState,
};

use common::{
    InMemoryUsageSource, organization_row, sandbox_row, snapshot_row, volume_row,
};

fn harness() -> (
    Arc<SharedStore>,
    Arc<InMemoryUsageSource>,
    UsageService,
    UsageEventSink,
) {
    let store = Arc::new(SharedStore::new());
    let source = InMemoryUsageSource::new();
    source.put_organization(organization_row("O1"));
    let config = QuotaCacheConfig::default();
    let service = UsageService::new(
        Arc::clone(&store),
        Arc::clone(&source) as Arc<dyn cabana_quota::UsageSource>,
        config.clone(),
    );
    let sink = UsageEventSink::new(Arc::clone(&store), &config);
    (store, source, service, sink)
}

#[tokio::test]
async fn test_transition_releases_compute_but_not_disk() {
    let (_, source, service, sink) = harness();
    source.put_sandbox(sandbox_row("S1", "O1", SandboxState::Started, 2, 4, 10));
    source.put_sandbox(sandbox_row("S2", "O1", SandboxState::Started, 4, 8, 20));
    service.get_sandbox_usage_overview("O1", None).await.unwrap();

    // Started -> Stopped leaves the compute set but stays in the disk set
    sink.handle(UsageEvent::sandbox_state_updated(
        sandbox_row("S2", "O1", SandboxState::Stopped, 4, 8, 20),
        SandboxState::Started,
        SandboxState::Stopped,
    ))
    .await;

    let overview = service.get_sandbox_usage_overview("O1", None).await.unwrap();
    assert_eq!(overview.current_cpu_usage, 2);
    assert_eq!(overview.current_memory_usage, 4);
    assert_eq!(overview.current_disk_usage, 30);
}

#[tokio::test]
async fn test_transition_out_of_disk_set_releases_disk() {
    let (_, source, service, sink) = harness();
    source.put_sandbox(sandbox_row("S1", "O1", SandboxState::Started, 2, 4, 10));
    source.put_sandbox(sandbox_row("S2", "O1", SandboxState::Stopped, 4, 8, 20));
    service.get_sandbox_usage_overview("O1", None).await.unwrap();

    // Stopped -> Destroyed releases the remaining disk contribution
    sink.handle(UsageEvent::sandbox_state_updated(
        sandbox_row("S2", "O1", SandboxState::Destroyed, 4, 8, 20),
        SandboxState::Stopped,
        SandboxState::Destroyed,
    ))
    .await;

    let overview = service.get_sandbox_usage_overview("O1", None).await.unwrap();
    assert_eq!(overview.current_cpu_usage, 2);
    assert_eq!(overview.current_memory_usage, 4);
    assert_eq!(overview.current_disk_usage, 10);
}

#[tokio::test]
async fn test_same_state_event_writes_nothing() {
    let (store, source, service, sink) = harness();
    source.put_sandbox(sandbox_row("S1", "O1", SandboxState::Started, 2, 4, 10));
    service.get_sandbox_usage_overview("O1", None).await.unwrap();

    let before: Vec<Option<String>> = [QuotaKind::Cpu, QuotaKind::Memory, QuotaKind::Disk]
        .iter()
        .map(|kind| store.get(&confirmed_usage_key("O1", *kind)))
        .collect();

    sink.handle(UsageEvent::sandbox_state_updated(
        sandbox_row("S1", "O1", SandboxState::Started, 2, 4, 10),
        SandboxState::Started,
        SandboxState::Started,
    ))
    .await;

    let after: Vec<Option<String>> = [QuotaKind::Cpu, QuotaKind::Memory, QuotaKind::Disk]
        .iter()
        .map(|kind| store.get(&confirmed_usage_key("O1", *kind)))
        .collect();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_created_sandbox_settles_reservation() {
    let (_, source, service, sink) = harness();
    source.put_sandbox(sandbox_row("S1", "O1", SandboxState::Started, 2, 4, 10));
    service.get_sandbox_usage_overview("O1", None).await.unwrap();

    service
        .increment_pending_sandbox_usage("O1", 1, 2, 5, None)
        .await
        .unwrap();

    // The reserved sandbox materializes
    source.put_sandbox(sandbox_row("S3", "O1", SandboxState::Started, 1, 2, 5));
    sink.handle(UsageEvent::sandbox_created(sandbox_row(
        "S3",
        "O1",
        SandboxState::Started,
        1,
        2,
        5,
    )))
    .await;

    let view = service
        .get_sandbox_usage_overview_with_pending("O1", None)
        .await
        .unwrap();
    assert_eq!(view.current_cpu_usage, 3);
    assert_eq!(view.current_memory_usage, 6);
    assert_eq!(view.current_disk_usage, 15);
    assert_eq!(view.pending_cpu_usage, Some(0));
    assert_eq!(view.pending_memory_usage, Some(0));
    assert_eq!(view.pending_disk_usage, Some(0));

    // Excluding the newly created sandbox removes exactly its contribution
    let without_s3 = service
        .get_sandbox_usage_overview("O1", Some("S3"))
        .await
        .unwrap();
    assert_eq!(without_s3.current_cpu_usage, 2);
    assert_eq!(without_s3.current_memory_usage, 4);
    assert_eq!(without_s3.current_disk_usage, 10);
}

#[tokio::test]
async fn test_delta_into_cold_cache_settles_pending_only() {
    let (store, source, service, sink) = harness();
    source.put_sandbox(sandbox_row("S1", "O1", SandboxState::Started, 2, 4, 10));

    // No rehydrate has happened; only a reservation exists
    service
        .increment_pending_sandbox_usage("O1", 1, 2, 5, None)
        .await
        .unwrap();

    sink.handle(UsageEvent::sandbox_created(sandbox_row(
        "S3",
        "O1",
        SandboxState::Started,
        1,
        2,
        5,
    )))
    .await;

    // Confirmed counters were not resurrected from the delta
    for kind in [QuotaKind::Cpu, QuotaKind::Memory, QuotaKind::Disk] {
        assert!(store.get(&confirmed_usage_key("O1", kind)).is_none());
    }
    // The reservation still settled
    assert_eq!(
        store.get(&pending_usage_key("O1", QuotaKind::Cpu)),
        Some("0".to_string())
    );
}

#[tokio::test]
async fn test_snapshot_count_follows_lifecycle() {
    let (_, source, service, sink) = harness();
    source.put_snapshot(snapshot_row("snap-1", "O1", SnapshotState::Active));
    assert_eq!(
        service
            .get_snapshot_usage_overview("O1")
            .await
            .unwrap()
            .current_snapshot_usage,
        1
    );

    source.put_snapshot(snapshot_row("snap-2", "O1", SnapshotState::Building));
    sink.handle(UsageEvent::snapshot_created(snapshot_row(
        "snap-2",
        "O1",
        SnapshotState::Building,
    )))
    .await;
    assert_eq!(
        service
            .get_snapshot_usage_overview("O1")
            .await
            .unwrap()
            .current_snapshot_usage,
        2
    );

    // Entering an ignored state releases the count
    sink.handle(UsageEvent::snapshot_state_updated(
        snapshot_row("snap-2", "O1", SnapshotState::Error),
        SnapshotState::Building,
        SnapshotState::Error,
    ))
    .await;
    assert_eq!(
        service
            .get_snapshot_usage_overview("O1")
            .await
            .unwrap()
            .current_snapshot_usage,
        1
    );

    // Ignored-to-ignored transitions are neutral
    sink.handle(UsageEvent::snapshot_state_updated(
        snapshot_row("snap-2", "O1", SnapshotState::Deleted),
        SnapshotState::Error,
        SnapshotState::Deleted,
    ))
    .await;
    assert_eq!(
        service
            .get_snapshot_usage_overview("O1")
            .await
            .unwrap()
            .current_snapshot_usage,
        1
    );
}

#[tokio::test]
async fn test_volume_count_follows_lifecycle() {
    let (_, source, service, sink) = harness();
    source.put_volume(volume_row("vol-1", "O1", VolumeState::Ready));
    assert_eq!(
        service
            .get_volume_usage_overview("O1")
            .await
            .unwrap()
            .current_volume_usage,
        1
    );

    source.put_volume(volume_row("vol-2", "O1", VolumeState::Creating));
    sink.handle(UsageEvent::volume_created(volume_row(
        "vol-2",
        "O1",
        VolumeState::Creating,
    )))
    .await;
    assert_eq!(
        service
            .get_volume_usage_overview("O1")
            .await
            .unwrap()
            .current_volume_usage,
        2
    );

    // Recovery out of an ignored state counts again
    sink.handle(UsageEvent::volume_state_updated(
        volume_row("vol-2", "O1", VolumeState::Error),
        VolumeState::Creating,
        VolumeState::Error,
    ))
    .await;
    sink.handle(UsageEvent::volume_state_updated(
        volume_row("vol-2", "O1", VolumeState::Ready),
        VolumeState::Error,
        VolumeState::Ready,
    ))
    .await;
    assert_eq!(
        service
            .get_volume_usage_overview("O1")
            .await
            .unwrap()
            .current_volume_usage,
        2
    );
}

#[tokio::test]
async fn test_subscription_loop_applies_events() {
    let (_, source, service, sink) = harness();
    source.put_sandbox(sandbox_row("S1", "O1", SandboxState::Started, 2, 4, 10));
    service.get_sandbox_usage_overview("O1", None).await.unwrap();

    let (tx, rx) = broadcast::channel(16);
    let worker = tokio::spawn(sink.run(rx));

    tx.send(UsageEvent::sandbox_state_updated(
        sandbox_row("S1", "O1", SandboxState::Stopped, 2, 4, 10),
        SandboxState::Started,
        SandboxState::Stopped,
    ))
    .unwrap();

    // Closing the feed ends the loop after the event drains
    drop(tx);
    worker.await.unwrap();

    let overview = service.get_sandbox_usage_overview("O1", None).await.unwrap();
    assert_eq!(overview.current_cpu_usage, 0);
    assert_eq!(overview.current_memory_usage, 0);
    assert_eq!(overview.current_disk_usage, 10);
}
