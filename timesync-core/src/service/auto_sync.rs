//! Per-pair auto-sync scheduler.
//!
//! One worker per pairing runs a burst immediately, then one per tick. A
//! failed burst is recorded on the job and the schedule continues; jobs only
//! end through an explicit stop or shutdown. Cancellation is observed
//! between bursts, never mid-sample.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{ServiceError, SyncService};
use crate::hub::HubError;
use crate::model::{AutoSyncConfig, AutoSyncJob, AutoSyncStatus, MultiSyncRequest};

/// Fixed per-sample timeout inside auto-sync bursts, in seconds.
const SAMPLE_TIMEOUT_SEC: u64 = 5;

struct JobHandle {
    job: Arc<RwLock<AutoSyncJob>>,
    cancel: watch::Sender<bool>,
}

/// Schedules periodic measurement bursts, one independent job per pairing.
pub struct AutoSyncMonitor {
    service: Arc<SyncService>,
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl AutoSyncMonitor {
    pub fn new(service: Arc<SyncService>) -> Self {
        AutoSyncMonitor {
            service,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a job for a pairing. Rejects a duplicate job and a pairing
    /// that is not currently in memory. Zeroed config values fall back to
    /// 60 s / 8 samples / 200 ms.
    pub fn start(&self, mut config: AutoSyncConfig) -> Result<(), ServiceError> {
        if config.interval_sec == 0 {
            config.interval_sec = 60;
        }
        if config.sample_count == 0 {
            config.sample_count = 8;
        }
        if config.interval_ms == 0 {
            config.interval_ms = 200;
        }

        let mut jobs = self.jobs.write().unwrap();

        if jobs.contains_key(&config.pairing_id) {
            return Err(ServiceError::AutoSyncAlreadyRunning(
                config.pairing_id.clone(),
            ));
        }

        let known = self
            .service
            .pairings()
            .iter()
            .any(|p| p.pairing_id == config.pairing_id);
        if !known {
            return Err(ServiceError::Hub(HubError::PairingNotFound(
                config.pairing_id.clone(),
            )));
        }

        let job = Arc::new(RwLock::new(AutoSyncJob {
            pairing_id: config.pairing_id.clone(),
            status: AutoSyncStatus::Running,
            config: config.clone(),
            started_at: Utc::now(),
            last_sync_at: None,
            last_sync_success: true,
            last_error: None,
            total_syncs: 0,
            failed_syncs: 0,
        }));

        let (cancel_tx, cancel_rx) = watch::channel(false);
        jobs.insert(
            config.pairing_id.clone(),
            JobHandle {
                job: Arc::clone(&job),
                cancel: cancel_tx,
            },
        );

        let service = Arc::clone(&self.service);
        info!(
            "Auto-sync started for pairing {} (interval: {}s, samples: {})",
            config.pairing_id, config.interval_sec, config.sample_count
        );
        tokio::spawn(run_job(service, job, config, cancel_rx));

        Ok(())
    }

    /// Cancels the worker and removes the job.
    pub fn stop(&self, pairing_id: &str) -> Result<(), ServiceError> {
        let mut jobs = self.jobs.write().unwrap();
        let Some(handle) = jobs.remove(pairing_id) else {
            return Err(ServiceError::AutoSyncNotRunning(pairing_id.to_string()));
        };

        let _ = handle.cancel.send(true);
        handle.job.write().unwrap().status = AutoSyncStatus::Stopped;
        info!("Auto-sync stopped for pairing {}", pairing_id);
        Ok(())
    }

    /// Snapshot of one job.
    pub fn status(&self, pairing_id: &str) -> Result<AutoSyncJob, ServiceError> {
        let jobs = self.jobs.read().unwrap();
        let handle = jobs
            .get(pairing_id)
            .ok_or_else(|| ServiceError::AutoSyncNotRunning(pairing_id.to_string()))?;
        let snapshot = handle.job.read().unwrap().clone();
        Ok(snapshot)
    }

    /// Snapshots of every job.
    pub fn all_statuses(&self) -> Vec<AutoSyncJob> {
        let jobs = self.jobs.read().unwrap();
        jobs.values()
            .map(|handle| handle.job.read().unwrap().clone())
            .collect()
    }

    /// Whether a running job exists for the pairing.
    pub fn is_running(&self, pairing_id: &str) -> bool {
        let jobs = self.jobs.read().unwrap();
        jobs.get(pairing_id)
            .map(|handle| handle.job.read().unwrap().status == AutoSyncStatus::Running)
            .unwrap_or(false)
    }

    /// Cancels every worker and clears the job table.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.write().unwrap();
        info!("Shutting down auto-sync monitor ({} jobs)", jobs.len());
        for (pairing_id, handle) in jobs.drain() {
            let _ = handle.cancel.send(true);
            handle.job.write().unwrap().status = AutoSyncStatus::Stopped;
            debug!("Stopped auto-sync for pairing {}", pairing_id);
        }
    }
}

/// Worker loop: one burst immediately, then one per tick until cancelled.
async fn run_job(
    service: Arc<SyncService>,
    job: Arc<RwLock<AutoSyncJob>>,
    config: AutoSyncConfig,
    mut cancel: watch::Receiver<bool>,
) {
    debug!("Auto-sync worker started for pairing {}", config.pairing_id);

    perform_burst(&service, &job, &config).await;

    let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_sec));
    ticker.tick().await; // the immediate tick; the initial burst already ran

    loop {
        tokio::select! {
            _ = cancel.changed() => {
                debug!("Auto-sync worker stopped for pairing {}", config.pairing_id);
                return;
            }
            _ = ticker.tick() => {
                perform_burst(&service, &job, &config).await;
            }
        }
    }
}

/// Runs one burst and folds its outcome into the job counters.
async fn perform_burst(
    service: &Arc<SyncService>,
    job: &Arc<RwLock<AutoSyncJob>>,
    config: &AutoSyncConfig,
) {
    debug!("Auto-sync executing for pairing {}", config.pairing_id);

    let req = MultiSyncRequest {
        pairing_id: config.pairing_id.clone(),
        sample_count: Some(config.sample_count),
        interval_ms: Some(config.interval_ms),
        timeout_sec: Some(SAMPLE_TIMEOUT_SEC),
    };

    let result = service.request_multi_sync(&req).await;

    let mut job = job.write().unwrap();
    job.last_sync_at = Some(Utc::now());
    job.total_syncs += 1;

    match result {
        Ok(result) => {
            job.last_sync_success = true;
            job.last_error = None;
            info!(
                "Auto-sync succeeded for pairing {}: offset={}ms, confidence={:.2}",
                config.pairing_id, result.best_offset, result.confidence
            );
        }
        Err(e) => {
            job.last_sync_success = false;
            job.last_error = Some(e.to_string());
            job.failed_syncs += 1;
            warn!("Auto-sync failed for pairing {}: {}", config.pairing_id, e);
        }
    }
}
