//! Measurement orchestration.
//!
//! Glues the hub, the selector, and the repository together: every completed
//! measurement is persisted, and a burst of measurements is condensed into
//! one aggregated result.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::ServiceError;
use crate::clock;
use crate::hub::Hub;
use crate::model::{
    AggregatedResult, Device, MultiSyncRequest, Pairing, SyncRecord, SyncStatus,
};
use crate::selector::{NtpSelector, SelectorConfig};
use crate::storage::Repository;

/// Timeout for a single on-demand measurement.
const SINGLE_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Hard cap on samples per burst.
const MAX_SAMPLES_PER_BURST: usize = 20;

pub struct SyncService {
    hub: Arc<Hub>,
    repo: Arc<Repository>,
}

impl SyncService {
    pub fn new(hub: Arc<Hub>, repo: Arc<Repository>) -> Self {
        SyncService { hub, repo }
    }

    // === Devices and pairings ===

    pub fn connected_devices(&self) -> Vec<Device> {
        self.hub.connected_devices()
    }

    pub fn pairings(&self) -> Vec<Pairing> {
        self.hub.pairings()
    }

    pub fn create_pairing(
        &self,
        device1_id: &str,
        device2_id: &str,
    ) -> Result<Pairing, ServiceError> {
        if device1_id == device2_id {
            return Err(ServiceError::SelfPair);
        }
        Ok(self.hub.create_pairing(device1_id, device2_id)?)
    }

    pub fn delete_pairing(&self, pairing_id: &str) -> Result<(), ServiceError> {
        Ok(self.hub.delete_pairing(pairing_id)?)
    }

    // === Single measurement ===

    /// Runs one measurement and persists the record. The record is returned
    /// even when PARTIAL or FAILED; callers inspect its status.
    pub async fn request_time_sync(&self, pairing_id: &str) -> Result<SyncRecord, ServiceError> {
        let mut record = self
            .hub
            .request_time_sync(pairing_id, SINGLE_SYNC_TIMEOUT)
            .await?;
        self.repo.save_sync_record(&mut record)?;
        Ok(record)
    }

    // === Measurement history ===

    pub fn get_sync_record(&self, id: i64) -> Result<SyncRecord, ServiceError> {
        Ok(self.repo.get_sync_record(id)?)
    }

    pub fn get_sync_records(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncRecord>, ServiceError> {
        Ok(self.repo.get_sync_records(limit, offset)?)
    }

    pub fn get_sync_records_by_device(
        &self,
        device_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncRecord>, ServiceError> {
        Ok(self.repo.get_sync_records_by_device(device_id, limit, offset)?)
    }

    pub fn get_sync_records_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncRecord>, ServiceError> {
        Ok(self
            .repo
            .get_sync_records_by_time_range(start, end, limit, offset)?)
    }

    // === Multi-sampling ===

    /// Runs a burst of measurements and condenses it into one aggregated
    /// result. Individual failures are skipped, never fatal; the burst only
    /// fails when no sample produced usable data.
    pub async fn request_multi_sync(
        &self,
        req: &MultiSyncRequest,
    ) -> Result<AggregatedResult, ServiceError> {
        let sample_count = match req.sample_count {
            Some(n) if n >= 1 && n <= MAX_SAMPLES_PER_BURST => n,
            _ => 8,
        };
        let interval = Duration::from_millis(match req.interval_ms {
            Some(ms) if ms > 0 => ms,
            _ => 200,
        });
        let timeout = Duration::from_secs(match req.timeout_sec {
            Some(sec) if sec > 0 => sec,
            _ => 5,
        });

        info!(
            "Starting multi-sync for pairing {}: {} samples, {}ms interval",
            req.pairing_id,
            sample_count,
            interval.as_millis()
        );

        let mut measurements: Vec<SyncRecord> = Vec::with_capacity(sample_count);
        for i in 0..sample_count {
            match self.hub.request_time_sync(&req.pairing_id, timeout).await {
                Ok(mut record) => {
                    if let Err(e) = self.repo.save_sync_record(&mut record) {
                        warn!("Failed to save sync record: {}", e);
                    }
                    if record.status == SyncStatus::Failed {
                        warn!("Sample {}/{} failed: no device responded", i + 1, sample_count);
                    } else {
                        measurements.push(record);
                    }
                }
                Err(e) => {
                    warn!("Sample {}/{} failed: {}", i + 1, sample_count, e);
                }
            }

            if i + 1 < sample_count {
                tokio::time::sleep(interval).await;
            }
        }

        if measurements.is_empty() {
            return Err(ServiceError::AllSamplesFailed(sample_count));
        }

        info!(
            "Collected {}/{} samples for pairing {}, selecting",
            measurements.len(),
            sample_count,
            req.pairing_id
        );

        let selector = NtpSelector::new(SelectorConfig {
            min_samples: 3,
            outlier_threshold: 2.0,
            top_percentile: 0.5,
        });
        let mut result = selector.select_best(&measurements)?;

        result.aggregation_id = Uuid::new_v4().to_string();
        result.pairing_id = req.pairing_id.clone();
        result.created_at = clock::now_millis();

        info!(
            "Selection completed for pairing {}: best_offset={}ms, confidence={:.2}, valid={}/{}",
            req.pairing_id,
            result.best_offset,
            result.confidence,
            result.valid_samples,
            result.total_samples
        );

        self.repo.save_aggregated_result(&result)?;
        Ok(result)
    }

    // === Aggregated history ===

    pub fn get_aggregated_result(
        &self,
        aggregation_id: &str,
    ) -> Result<AggregatedResult, ServiceError> {
        Ok(self.repo.get_aggregated_result(aggregation_id)?)
    }

    pub fn get_aggregated_results(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AggregatedResult>, ServiceError> {
        Ok(self.repo.get_aggregated_results(limit, offset)?)
    }

    pub fn get_aggregated_results_by_pairing(
        &self,
        pairing_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AggregatedResult>, ServiceError> {
        Ok(self
            .repo
            .get_aggregated_results_by_pairing(pairing_id, limit, offset)?)
    }

    pub fn get_aggregated_results_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AggregatedResult>, ServiceError> {
        Ok(self
            .repo
            .get_aggregated_results_by_time_range(start, end, limit, offset)?)
    }
}
