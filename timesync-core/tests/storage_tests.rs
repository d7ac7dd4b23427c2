//! Tests for the SQLite repository.

mod common;

use chrono::{DateTime, TimeZone, Utc};
use common::test_record;
use timesync_core::model::{AggregatedResult, DeviceKind, PersistentPairing, SyncStatus};
use timesync_core::storage::{Repository, StorageError};

fn ms(ts: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ts).unwrap()
}

fn test_pairing(id: &str, d1: &str, d2: &str) -> PersistentPairing {
    PersistentPairing {
        pairing_id: id.to_string(),
        device1_id: d1.to_string(),
        device2_id: d2.to_string(),
        created_at: ms(1_700_000_000_000),
        auto_sync_interval_sec: Some(60),
        auto_sync_sample_count: Some(8),
        auto_sync_interval_ms: Some(200),
    }
}

#[test]
fn save_assigns_row_id_and_round_trips() {
    let repo = Repository::in_memory().unwrap();

    let mut record = test_record(0, 5_000, 6_000, -150);
    repo.save_sync_record(&mut record).unwrap();
    assert!(record.id > 0);

    let loaded = repo.get_sync_record(record.id).unwrap();
    assert_eq!(loaded.device1_id, "psg-001");
    assert_eq!(loaded.device1_type, Some(DeviceKind::Psg));
    assert_eq!(loaded.device2_type, Some(DeviceKind::Watch));
    assert_eq!(loaded.device1_rtt, Some(5_000));
    assert_eq!(loaded.device2_rtt, Some(6_000));
    assert_eq!(loaded.time_difference, Some(-150));
    assert_eq!(loaded.status, SyncStatus::Success);
    assert_eq!(loaded.error_message, None);
}

#[test]
fn failed_record_round_trips_with_missing_fields() {
    let repo = Repository::in_memory().unwrap();

    let mut record = test_record(0, 0, 0, 0);
    record.device1_timestamp = None;
    record.device2_timestamp = None;
    record.device1_rtt = None;
    record.device2_rtt = None;
    record.time_difference = None;
    record.device2_type = None;
    record.status = SyncStatus::Failed;
    record.error_message = Some("Both devices failed to respond".to_string());

    repo.save_sync_record(&mut record).unwrap();
    let loaded = repo.get_sync_record(record.id).unwrap();

    assert_eq!(loaded.status, SyncStatus::Failed);
    assert_eq!(loaded.device1_timestamp, None);
    assert_eq!(loaded.device1_rtt, None);
    assert_eq!(loaded.time_difference, None);
    assert_eq!(loaded.device2_type, None);
    assert_eq!(
        loaded.error_message.as_deref(),
        Some("Both devices failed to respond")
    );
}

#[test]
fn missing_record_is_not_found() {
    let repo = Repository::in_memory().unwrap();
    let result = repo.get_sync_record(42);
    assert!(matches!(result, Err(StorageError::NotFound(_))));
}

#[test]
fn listing_orders_newest_first_and_paginates() {
    let repo = Repository::in_memory().unwrap();

    for (i, created) in [(1, 100), (2, 200), (3, 300)] {
        let mut record = test_record(0, 5_000, 6_000, -150);
        record.created_at = created;
        record.device1_id = format!("psg-{i:03}");
        repo.save_sync_record(&mut record).unwrap();
    }

    // Non-positive limit falls back to the default page size.
    let all = repo.get_sync_records(0, 0).unwrap();
    let created: Vec<i64> = all.iter().map(|r| r.created_at).collect();
    assert_eq!(created, vec![300, 200, 100]);

    let page = repo.get_sync_records(2, 1).unwrap();
    let created: Vec<i64> = page.iter().map(|r| r.created_at).collect();
    assert_eq!(created, vec![200, 100]);
}

#[test]
fn device_filter_matches_either_side() {
    let repo = Repository::in_memory().unwrap();

    let mut first = test_record(0, 5_000, 6_000, -150);
    first.device1_id = "psg-a".to_string();
    first.device2_id = "watch-a".to_string();
    repo.save_sync_record(&mut first).unwrap();

    let mut second = test_record(0, 5_000, 6_000, -150);
    second.device1_id = "watch-a".to_string();
    second.device2_id = "psg-b".to_string();
    second.created_at += 1;
    repo.save_sync_record(&mut second).unwrap();

    let mut other = test_record(0, 5_000, 6_000, -150);
    other.device1_id = "psg-c".to_string();
    other.device2_id = "watch-c".to_string();
    repo.save_sync_record(&mut other).unwrap();

    let records = repo.get_sync_records_by_device("watch-a", 50, 0).unwrap();
    assert_eq!(records.len(), 2);
}

#[test]
fn time_range_filter_is_inclusive() {
    let repo = Repository::in_memory().unwrap();

    for created in [1_000, 2_000, 3_000] {
        let mut record = test_record(0, 5_000, 6_000, -150);
        record.created_at = created;
        repo.save_sync_record(&mut record).unwrap();
    }

    let records = repo
        .get_sync_records_by_time_range(ms(1_000), ms(2_000), 50, 0)
        .unwrap();
    assert_eq!(records.len(), 2);

    let none = repo
        .get_sync_records_by_time_range(ms(10_000), ms(20_000), 50, 0)
        .unwrap();
    assert!(none.is_empty());
}

fn test_aggregate(id: &str, measurements: Vec<timesync_core::model::SyncRecord>) -> AggregatedResult {
    AggregatedResult {
        aggregation_id: id.to_string(),
        pairing_id: "pair-1".to_string(),
        best_offset: -150,
        median_offset: -150,
        mean_offset: -150.2,
        offset_std_dev: 0.8,
        min_rtt: 9_000,
        max_rtt: 11_000,
        mean_rtt: 10_000.0,
        confidence: 0.92,
        jitter: 512.5,
        total_samples: measurements.len(),
        valid_samples: measurements.iter().filter(|m| m.id != 0).count(),
        outlier_count: 0,
        measurements,
        created_at: 1_700_000_000_500,
    }
}

#[test]
fn aggregate_links_persisted_measurements_only() {
    let repo = Repository::in_memory().unwrap();

    let mut first = test_record(0, 5_000, 6_000, -150);
    first.created_at = 100;
    repo.save_sync_record(&mut first).unwrap();

    let mut second = test_record(0, 4_000, 5_000, -151);
    second.created_at = 200;
    repo.save_sync_record(&mut second).unwrap();

    // Never persisted; must be skipped when linking.
    let unsaved = test_record(0, 6_000, 7_000, -149);

    let aggregate = test_aggregate("agg-1", vec![first, second, unsaved]);
    repo.save_aggregated_result(&aggregate).unwrap();

    let loaded = repo.get_aggregated_result("agg-1").unwrap();
    assert_eq!(loaded.pairing_id, "pair-1");
    assert_eq!(loaded.best_offset, -150);
    assert_eq!(loaded.confidence, 0.92);
    assert_eq!(loaded.measurements.len(), 2);
    // Hydrated oldest first.
    assert_eq!(loaded.measurements[0].created_at, 100);
    assert_eq!(loaded.measurements[1].created_at, 200);
}

#[test]
fn missing_aggregate_is_not_found() {
    let repo = Repository::in_memory().unwrap();
    let result = repo.get_aggregated_result("nope");
    assert!(matches!(result, Err(StorageError::NotFound(_))));
}

#[test]
fn aggregates_filter_by_pairing_and_time_range() {
    let repo = Repository::in_memory().unwrap();

    let mut a = test_aggregate("agg-a", vec![]);
    a.pairing_id = "pair-a".to_string();
    a.created_at = 1_000;
    repo.save_aggregated_result(&a).unwrap();

    let mut b = test_aggregate("agg-b", vec![]);
    b.pairing_id = "pair-b".to_string();
    b.created_at = 2_000;
    repo.save_aggregated_result(&b).unwrap();

    let by_pairing = repo.get_aggregated_results_by_pairing("pair-a", 50, 0).unwrap();
    assert_eq!(by_pairing.len(), 1);
    assert_eq!(by_pairing[0].aggregation_id, "agg-a");

    let by_range = repo
        .get_aggregated_results_by_time_range(ms(1_500), ms(2_500), 50, 0)
        .unwrap();
    assert_eq!(by_range.len(), 1);
    assert_eq!(by_range[0].aggregation_id, "agg-b");

    let all = repo.get_aggregated_results(50, 0).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].aggregation_id, "agg-b"); // newest first
}

#[test]
fn pairing_round_trips_with_auto_sync_parameters() {
    let repo = Repository::in_memory().unwrap();

    repo.save_pairing(&test_pairing("pair-1", "psg-001", "watch-001"))
        .unwrap();

    let loaded = repo.get_pairing_by_id("pair-1").unwrap();
    assert_eq!(loaded.device1_id, "psg-001");
    assert_eq!(loaded.auto_sync_interval_sec, Some(60));
    assert_eq!(loaded.auto_sync_sample_count, Some(8));
    assert_eq!(loaded.auto_sync_interval_ms, Some(200));
    assert_eq!(loaded.created_at, ms(1_700_000_000_000));
}

#[test]
fn pairing_without_auto_sync_parameters() {
    let repo = Repository::in_memory().unwrap();

    let mut pairing = test_pairing("pair-1", "psg-001", "watch-001");
    pairing.auto_sync_interval_sec = None;
    pairing.auto_sync_sample_count = None;
    pairing.auto_sync_interval_ms = None;
    repo.save_pairing(&pairing).unwrap();

    let loaded = repo.get_pairing_by_id("pair-1").unwrap();
    assert_eq!(loaded.auto_sync_interval_sec, None);
}

#[test]
fn device_pair_is_unique_regardless_of_order() {
    let repo = Repository::in_memory().unwrap();

    repo.save_pairing(&test_pairing("pair-1", "psg-001", "watch-001"))
        .unwrap();

    let reversed = test_pairing("pair-2", "watch-001", "psg-001");
    let result = repo.save_pairing(&reversed);
    assert!(matches!(result, Err(StorageError::PairingExists(_, _))));
}

#[test]
fn pairing_lookup_by_devices_is_bidirectional() {
    let repo = Repository::in_memory().unwrap();

    repo.save_pairing(&test_pairing("pair-1", "psg-001", "watch-001"))
        .unwrap();

    let forward = repo.get_pairing_by_devices("psg-001", "watch-001").unwrap();
    let backward = repo.get_pairing_by_devices("watch-001", "psg-001").unwrap();

    assert_eq!(forward.as_ref().map(|p| p.pairing_id.as_str()), Some("pair-1"));
    assert_eq!(
        forward.map(|p| p.pairing_id),
        backward.map(|p| p.pairing_id)
    );

    let absent = repo.get_pairing_by_devices("psg-001", "mobile-001").unwrap();
    assert!(absent.is_none());
}

#[test]
fn pairings_list_by_device() {
    let repo = Repository::in_memory().unwrap();

    repo.save_pairing(&test_pairing("pair-1", "psg-001", "watch-001"))
        .unwrap();
    repo.save_pairing(&test_pairing("pair-2", "psg-001", "mobile-001"))
        .unwrap();
    repo.save_pairing(&test_pairing("pair-3", "psg-002", "watch-002"))
        .unwrap();

    let for_psg = repo.get_pairings_by_device("psg-001").unwrap();
    assert_eq!(for_psg.len(), 2);

    let all = repo.get_all_pairings().unwrap();
    assert_eq!(all.len(), 3);
}

#[test]
fn deleting_an_absent_pairing_fails() {
    let repo = Repository::in_memory().unwrap();

    repo.save_pairing(&test_pairing("pair-1", "psg-001", "watch-001"))
        .unwrap();
    repo.delete_pairing("pair-1").unwrap();

    let result = repo.delete_pairing("pair-1");
    assert!(matches!(result, Err(StorageError::NotFound(_))));
}

#[test]
fn on_disk_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("time-sync.db");

    {
        let repo = Repository::open(&path).unwrap();
        let mut record = test_record(0, 5_000, 6_000, -150);
        repo.save_sync_record(&mut record).unwrap();
    }

    let repo = Repository::open(&path).unwrap();
    let records = repo.get_sync_records(50, 0).unwrap();
    assert_eq!(records.len(), 1);
}
