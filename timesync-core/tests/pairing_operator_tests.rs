//! Tests for pairing restoration on device reconnect.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::fake_session;
use timesync_core::hub::{DeviceConnectedListener, Hub};
use timesync_core::model::{DeviceKind, PersistentPairing};
use timesync_core::service::{AutoSyncMonitor, PairingOperator, SyncService};
use timesync_core::storage::Repository;

struct Fixture {
    hub: Arc<Hub>,
    repo: Arc<Repository>,
    monitor: Arc<AutoSyncMonitor>,
    operator: Arc<PairingOperator>,
}

fn setup() -> Fixture {
    let hub = Hub::new();
    let repo = Arc::new(Repository::in_memory().unwrap());
    let service = Arc::new(SyncService::new(hub.clone(), repo.clone()));
    let monitor = Arc::new(AutoSyncMonitor::new(service));
    let operator = Arc::new(PairingOperator::new(
        hub.clone(),
        repo.clone(),
        monitor.clone(),
    ));
    Fixture {
        hub,
        repo,
        monitor,
        operator,
    }
}

fn saved_pairing(id: &str, with_auto_sync: bool) -> PersistentPairing {
    PersistentPairing {
        pairing_id: id.to_string(),
        device1_id: "psg-001".to_string(),
        device2_id: "watch-001".to_string(),
        created_at: Utc::now(),
        auto_sync_interval_sec: with_auto_sync.then_some(60),
        auto_sync_sample_count: with_auto_sync.then_some(8),
        auto_sync_interval_ms: with_auto_sync.then_some(200),
    }
}

#[tokio::test]
async fn restoration_waits_for_the_counterpart() {
    let fixture = setup();
    fixture.repo.save_pairing(&saved_pairing("pair-1", true)).unwrap();

    let (_rx1, _) = fake_session(&fixture.hub, "psg-001", DeviceKind::Psg);
    fixture.operator.on_device_connected("psg-001");

    // The watch is still offline, so nothing is restored yet.
    assert!(!fixture.hub.is_pairing_restored("pair-1"));
    assert!(!fixture.monitor.is_running("pair-1"));

    let (_rx2, _) = fake_session(&fixture.hub, "watch-001", DeviceKind::Watch);
    fixture.operator.on_device_connected("watch-001");

    assert!(fixture.hub.is_pairing_restored("pair-1"));
    assert!(fixture.monitor.is_running("pair-1"));

    let job = fixture.monitor.status("pair-1").unwrap();
    assert_eq!(job.config.interval_sec, 60);
    assert_eq!(job.config.sample_count, 8);
    assert_eq!(job.config.interval_ms, 200);
}

#[tokio::test]
async fn repeated_restoration_is_idempotent() {
    let fixture = setup();
    fixture.repo.save_pairing(&saved_pairing("pair-1", true)).unwrap();

    let (_rx1, _) = fake_session(&fixture.hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&fixture.hub, "watch-001", DeviceKind::Watch);

    fixture.operator.on_device_connected("watch-001");
    fixture.operator.on_device_connected("watch-001");
    fixture.operator.on_device_connected("psg-001");

    assert!(fixture.hub.is_pairing_restored("pair-1"));
    assert_eq!(fixture.hub.pairings().len(), 1);
    assert_eq!(fixture.monitor.all_statuses().len(), 1);
}

#[tokio::test]
async fn restoration_without_saved_parameters_skips_auto_sync() {
    let fixture = setup();
    fixture.repo.save_pairing(&saved_pairing("pair-1", false)).unwrap();

    let (_rx1, _) = fake_session(&fixture.hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&fixture.hub, "watch-001", DeviceKind::Watch);
    fixture.operator.on_device_connected("psg-001");

    assert!(fixture.hub.is_pairing_restored("pair-1"));
    assert!(!fixture.monitor.is_running("pair-1"));
}

#[tokio::test]
async fn running_job_is_left_untouched_on_restore() {
    let fixture = setup();
    fixture.repo.save_pairing(&saved_pairing("pair-1", true)).unwrap();

    let (_rx1, _) = fake_session(&fixture.hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&fixture.hub, "watch-001", DeviceKind::Watch);

    fixture.operator.on_device_connected("psg-001");
    let started_at = fixture.monitor.status("pair-1").unwrap().started_at;

    // A second restoration attempt must not replace the job.
    fixture.operator.on_device_connected("watch-001");
    assert_eq!(fixture.monitor.status("pair-1").unwrap().started_at, started_at);
}

#[tokio::test]
async fn device_without_pairings_is_a_noop() {
    let fixture = setup();
    let (_rx, _) = fake_session(&fixture.hub, "mobile-001", DeviceKind::Mobile);

    fixture.operator.on_device_connected("mobile-001");

    assert!(fixture.hub.pairings().is_empty());
    assert!(fixture.monitor.all_statuses().is_empty());
}

#[tokio::test]
async fn hub_notifies_the_operator_on_registration() {
    let fixture = setup();
    fixture.repo.save_pairing(&saved_pairing("pair-1", false)).unwrap();

    let listener: Arc<dyn DeviceConnectedListener> = fixture.operator.clone();
    fixture.hub.set_connect_listener(listener);

    let (_rx1, _) = fake_session(&fixture.hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&fixture.hub, "watch-001", DeviceKind::Watch);

    // The notification runs on its own task; poll briefly.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while !fixture.hub.is_pairing_restored("pair-1") {
        if std::time::Instant::now() > deadline {
            panic!("pairing was not restored after reconnect");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
