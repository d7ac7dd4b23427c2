//! Pairing restoration on device reconnect.
//!
//! Whichever device of a durable pairing reconnects second triggers the
//! pair's restoration, giving at-least-once semantics; the idempotency
//! checks keep duplicates out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::AutoSyncMonitor;
use crate::hub::{DeviceConnectedListener, Hub};
use crate::model::{AutoSyncConfig, PersistentPairing};
use crate::storage::Repository;

/// Restores in-memory pairings and their auto-sync jobs when devices
/// reconnect.
pub struct PairingOperator {
    hub: Arc<Hub>,
    repo: Arc<Repository>,
    monitor: Arc<AutoSyncMonitor>,
}

impl PairingOperator {
    pub fn new(hub: Arc<Hub>, repo: Arc<Repository>, monitor: Arc<AutoSyncMonitor>) -> Self {
        PairingOperator { hub, repo, monitor }
    }

    /// Restarts auto-sync for a restored pairing from its persisted
    /// parameters, unless a job is already running or no parameters were
    /// saved.
    fn restart_auto_sync(&self, pairing: &PersistentPairing) {
        let (Some(interval_sec), Some(sample_count), Some(interval_ms)) = (
            pairing.auto_sync_interval_sec,
            pairing.auto_sync_sample_count,
            pairing.auto_sync_interval_ms,
        ) else {
            debug!(
                "No auto-sync configuration for pairing {}, skipping auto-start",
                pairing.pairing_id
            );
            return;
        };

        if self.monitor.is_running(&pairing.pairing_id) {
            debug!(
                "Auto-sync already running for pairing {}, skipping",
                pairing.pairing_id
            );
            return;
        }

        let config = AutoSyncConfig {
            pairing_id: pairing.pairing_id.clone(),
            interval_sec,
            sample_count,
            interval_ms,
        };

        match self.monitor.start(config) {
            Ok(()) => info!(
                "Auto-sync restarted for pairing {} (interval: {}s, samples: {})",
                pairing.pairing_id, interval_sec, sample_count
            ),
            Err(e) => warn!(
                "Failed to restart auto-sync for pairing {}: {}",
                pairing.pairing_id, e
            ),
        }
    }
}

impl DeviceConnectedListener for PairingOperator {
    fn on_device_connected(&self, device_id: &str) {
        let pairings = match self.repo.get_pairings_by_device(device_id) {
            Ok(pairings) => pairings,
            Err(e) => {
                warn!("Failed to load pairings for device {}: {}", device_id, e);
                return;
            }
        };

        if pairings.is_empty() {
            debug!("No pairings found for device {}", device_id);
            return;
        }

        debug!(
            "Found {} pairing(s) for device {}, checking for restoration",
            pairings.len(),
            device_id
        );

        for persistent in pairings {
            let other = persistent.other_device(device_id);

            if !self.hub.is_device_connected(other) {
                debug!(
                    "Pairing {} not restorable yet: {} not connected",
                    persistent.pairing_id, other
                );
                continue;
            }

            if self.hub.is_pairing_restored(&persistent.pairing_id) {
                debug!("Pairing {} already restored", persistent.pairing_id);
                continue;
            }

            if let Err(e) = self.hub.restore_pairing(persistent.as_pairing()) {
                warn!("Failed to restore pairing {}: {}", persistent.pairing_id, e);
                continue;
            }

            info!(
                "Pairing restored: {} ({} <-> {})",
                persistent.pairing_id, persistent.device1_id, persistent.device2_id
            );

            self.restart_auto_sync(&persistent);
        }
    }
}
