//! Tests for the per-pair auto-sync scheduler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{fake_session, spawn_echo_device};
use timesync_core::hub::Hub;
use timesync_core::model::{AutoSyncConfig, AutoSyncStatus, DeviceKind};
use timesync_core::service::{AutoSyncMonitor, ServiceError, SyncService};
use timesync_core::storage::Repository;

fn setup() -> (Arc<Hub>, Arc<AutoSyncMonitor>) {
    let hub = Hub::new();
    let repo = Arc::new(Repository::in_memory().unwrap());
    let service = Arc::new(SyncService::new(hub.clone(), repo));
    let monitor = Arc::new(AutoSyncMonitor::new(service));
    (hub, monitor)
}

fn config(pairing_id: &str, interval_sec: u64, sample_count: usize) -> AutoSyncConfig {
    AutoSyncConfig {
        pairing_id: pairing_id.to_string(),
        interval_sec,
        sample_count,
        interval_ms: 10,
    }
}

/// Polls the job snapshot until `pred` holds or the deadline passes.
async fn wait_for_status(
    monitor: &AutoSyncMonitor,
    pairing_id: &str,
    deadline: Duration,
    pred: impl Fn(&timesync_core::model::AutoSyncJob) -> bool,
) -> timesync_core::model::AutoSyncJob {
    let start = std::time::Instant::now();
    loop {
        if let Ok(job) = monitor.status(pairing_id) {
            if pred(&job) {
                return job;
            }
            if start.elapsed() > deadline {
                panic!("auto-sync job did not reach expected state: {job:?}");
            }
        } else if start.elapsed() > deadline {
            panic!("auto-sync job vanished while waiting");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn start_applies_defaults_for_zeroed_values() {
    let (hub, monitor) = setup();
    let (_rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&hub, "watch-001", DeviceKind::Watch);
    let pairing = hub.create_pairing("psg-001", "watch-001").unwrap();

    monitor
        .start(AutoSyncConfig {
            pairing_id: pairing.pairing_id.clone(),
            interval_sec: 0,
            sample_count: 0,
            interval_ms: 0,
        })
        .unwrap();

    let job = monitor.status(&pairing.pairing_id).unwrap();
    assert_eq!(job.status, AutoSyncStatus::Running);
    assert_eq!(job.config.interval_sec, 60);
    assert_eq!(job.config.sample_count, 8);
    assert_eq!(job.config.interval_ms, 200);
    assert!(monitor.is_running(&pairing.pairing_id));
}

#[tokio::test]
async fn duplicate_start_is_rejected() {
    let (hub, monitor) = setup();
    let (_rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&hub, "watch-001", DeviceKind::Watch);
    let pairing = hub.create_pairing("psg-001", "watch-001").unwrap();

    monitor.start(config(&pairing.pairing_id, 60, 1)).unwrap();
    let result = monitor.start(config(&pairing.pairing_id, 60, 1));
    assert!(matches!(result, Err(ServiceError::AutoSyncAlreadyRunning(_))));
}

#[tokio::test]
async fn start_requires_an_in_memory_pairing() {
    let (_hub, monitor) = setup();
    let result = monitor.start(config("no-such-pairing", 60, 1));
    assert!(matches!(result, Err(ServiceError::Hub(_))));
}

#[tokio::test]
async fn stop_removes_the_job() {
    let (hub, monitor) = setup();
    let (_rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&hub, "watch-001", DeviceKind::Watch);
    let pairing = hub.create_pairing("psg-001", "watch-001").unwrap();

    monitor.start(config(&pairing.pairing_id, 60, 1)).unwrap();
    monitor.stop(&pairing.pairing_id).unwrap();

    assert!(!monitor.is_running(&pairing.pairing_id));
    assert!(matches!(
        monitor.status(&pairing.pairing_id),
        Err(ServiceError::AutoSyncNotRunning(_))
    ));
    assert!(matches!(
        monitor.stop(&pairing.pairing_id),
        Err(ServiceError::AutoSyncNotRunning(_))
    ));
}

#[tokio::test]
async fn burst_outcomes_are_counted_and_failures_do_not_stop_the_job() {
    let (hub, monitor) = setup();
    let (rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (rx2, token2) = fake_session(&hub, "watch-001", DeviceKind::Watch);
    spawn_echo_device(hub.clone(), "psg-001".to_string(), rx1, 500);
    spawn_echo_device(hub.clone(), "watch-001".to_string(), rx2, 0);

    let pairing = hub.create_pairing("psg-001", "watch-001").unwrap();
    monitor.start(config(&pairing.pairing_id, 1, 1)).unwrap();

    // The immediate burst succeeds against the echo devices.
    let job = wait_for_status(&monitor, &pairing.pairing_id, Duration::from_secs(3), |j| {
        j.total_syncs >= 1
    })
    .await;
    assert!(job.last_sync_success);
    assert!(job.last_sync_at.is_some());
    assert_eq!(job.failed_syncs, 0);

    // Losing the watch removes the in-memory pairing; the next tick's burst
    // fails, but the job keeps running.
    hub.unregister_session("watch-001", token2);

    let job = wait_for_status(&monitor, &pairing.pairing_id, Duration::from_secs(5), |j| {
        j.failed_syncs >= 1
    })
    .await;
    assert_eq!(job.status, AutoSyncStatus::Running);
    assert!(!job.last_sync_success);
    assert!(job.last_error.is_some());
    assert!(monitor.is_running(&pairing.pairing_id));
}

#[tokio::test]
async fn shutdown_cancels_every_job() {
    let (hub, monitor) = setup();
    let (_rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&hub, "watch-001", DeviceKind::Watch);
    let (_rx3, _) = fake_session(&hub, "mobile-001", DeviceKind::Mobile);

    let first = hub.create_pairing("psg-001", "watch-001").unwrap();
    let second = hub.create_pairing("psg-001", "mobile-001").unwrap();
    monitor.start(config(&first.pairing_id, 60, 1)).unwrap();
    monitor.start(config(&second.pairing_id, 60, 1)).unwrap();
    assert_eq!(monitor.all_statuses().len(), 2);

    monitor.shutdown();

    assert!(monitor.all_statuses().is_empty());
    assert!(!monitor.is_running(&first.pairing_id));
    assert!(!monitor.is_running(&second.pairing_id));
}
