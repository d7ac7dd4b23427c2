//! End-to-end tests for the measurement orchestration: hub, selector, and
//! repository working together against simulated devices.

mod common;

use std::sync::Arc;

use common::{fake_session, spawn_echo_device};
use timesync_core::hub::Hub;
use timesync_core::model::{DeviceKind, MultiSyncRequest, SyncStatus};
use timesync_core::service::{ServiceError, SyncService};
use timesync_core::storage::Repository;

fn service_with_hub() -> (Arc<Hub>, Arc<SyncService>) {
    let hub = Hub::new();
    let repo = Arc::new(Repository::in_memory().unwrap());
    let service = Arc::new(SyncService::new(hub.clone(), repo));
    (hub, service)
}

#[tokio::test]
async fn single_measurement_is_persisted() {
    let (hub, service) = service_with_hub();

    let (rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (rx2, _) = fake_session(&hub, "watch-001", DeviceKind::Watch);
    spawn_echo_device(hub.clone(), "psg-001".to_string(), rx1, 1_000);
    spawn_echo_device(hub.clone(), "watch-001".to_string(), rx2, 0);

    let pairing = service.create_pairing("psg-001", "watch-001").unwrap();
    let record = service.request_time_sync(&pairing.pairing_id).await.unwrap();

    assert_eq!(record.status, SyncStatus::Success);
    assert!(record.id > 0);

    let loaded = service.get_sync_record(record.id).unwrap();
    assert_eq!(loaded.status, SyncStatus::Success);
    assert_eq!(loaded.device1_id, "psg-001");
}

#[tokio::test]
async fn self_pairing_is_rejected() {
    let (hub, service) = service_with_hub();
    let (_rx, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);

    let result = service.create_pairing("psg-001", "psg-001");
    assert!(matches!(result, Err(ServiceError::SelfPair)));
}

#[tokio::test]
async fn multi_sync_aggregates_and_links_measurements() {
    let (hub, service) = service_with_hub();

    let (rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (rx2, _) = fake_session(&hub, "watch-001", DeviceKind::Watch);
    spawn_echo_device(hub.clone(), "psg-001".to_string(), rx1, 150_000);
    spawn_echo_device(hub.clone(), "watch-001".to_string(), rx2, 0);

    let pairing = service.create_pairing("psg-001", "watch-001").unwrap();

    let result = service
        .request_multi_sync(&MultiSyncRequest {
            pairing_id: pairing.pairing_id.clone(),
            sample_count: Some(4),
            interval_ms: Some(10),
            timeout_sec: Some(1),
        })
        .await
        .unwrap();

    assert!(!result.aggregation_id.is_empty());
    assert_eq!(result.pairing_id, pairing.pairing_id);
    assert_eq!(result.total_samples, 4);
    assert!(result.valid_samples >= 3);
    assert!(result.created_at > 0);
    assert!((0.0..=1.0).contains(&result.confidence));
    assert!(
        (result.best_offset - 150_000).abs() < 1_000,
        "best offset {} should be close to 150000",
        result.best_offset
    );
    assert_eq!(result.median_offset, result.best_offset);

    // Every sample was persisted and linked to the aggregate.
    assert!(result.measurements.iter().all(|m| m.id > 0));
    let loaded = service.get_aggregated_result(&result.aggregation_id).unwrap();
    assert_eq!(loaded.measurements.len(), 4);

    let by_pairing = service
        .get_aggregated_results_by_pairing(&pairing.pairing_id, 50, 0)
        .unwrap();
    assert_eq!(by_pairing.len(), 1);
}

#[tokio::test]
async fn multi_sync_fails_when_no_sample_succeeds() {
    let (hub, service) = service_with_hub();

    // Connected but silent devices: every sample times out as FAILED.
    let (_rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (_rx2, _) = fake_session(&hub, "watch-001", DeviceKind::Watch);

    let pairing = service.create_pairing("psg-001", "watch-001").unwrap();

    let result = service
        .request_multi_sync(&MultiSyncRequest {
            pairing_id: pairing.pairing_id.clone(),
            sample_count: Some(1),
            interval_ms: Some(10),
            timeout_sec: Some(1),
        })
        .await;

    assert!(matches!(result, Err(ServiceError::AllSamplesFailed(1))));

    // The failed sample is still persisted for audit.
    let records = service.get_sync_records(50, 0).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, SyncStatus::Failed);
}

#[tokio::test]
async fn multi_sync_unknown_pairing_fails() {
    let (_hub, service) = service_with_hub();

    let result = service
        .request_multi_sync(&MultiSyncRequest {
            pairing_id: "nope".to_string(),
            sample_count: Some(1),
            interval_ms: Some(10),
            timeout_sec: Some(1),
        })
        .await;

    assert!(matches!(result, Err(ServiceError::AllSamplesFailed(_))));
}

#[tokio::test]
async fn partial_samples_contribute_to_the_aggregate() {
    let (hub, service) = service_with_hub();

    let (rx1, _) = fake_session(&hub, "psg-001", DeviceKind::Psg);
    let (rx2, _) = fake_session(&hub, "watch-001", DeviceKind::Watch);
    spawn_echo_device(hub.clone(), "psg-001".to_string(), rx1, 0);
    spawn_echo_device(hub.clone(), "watch-001".to_string(), rx2, 0);

    let pairing = service.create_pairing("psg-001", "watch-001").unwrap();

    // Complete bursts from healthy devices survive selection even when the
    // minimum floor bites (3 of 3 samples survive here).
    let result = service
        .request_multi_sync(&MultiSyncRequest {
            pairing_id: pairing.pairing_id.clone(),
            sample_count: Some(3),
            interval_ms: Some(10),
            timeout_sec: Some(1),
        })
        .await
        .unwrap();

    assert_eq!(result.total_samples, 3);
    assert_eq!(result.valid_samples, 3);
    assert!(result.best_offset.abs() < 1_000);
}
