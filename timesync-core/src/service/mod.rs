//! Service Layer
//!
//! Orchestration above the hub: single and multi-sample measurements, the
//! per-pair auto-sync scheduler, and pairing restoration on reconnect.

mod auto_sync;
mod pairing_operator;
mod sync_service;

pub use auto_sync::AutoSyncMonitor;
pub use pairing_operator::PairingOperator;
pub use sync_service::SyncService;

use thiserror::Error;

use crate::hub::HubError;
use crate::selector::SelectorError;
use crate::storage::StorageError;

/// Unified error type for the service layer.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// A device cannot be paired with itself.
    #[error("cannot pair a device with itself")]
    SelfPair,

    /// Every sample of a burst failed.
    #[error("all {0} samples failed")]
    AllSamplesFailed(usize),

    /// An auto-sync job already exists for the pairing.
    #[error("auto-sync already running for pairing: {0}")]
    AutoSyncAlreadyRunning(String),

    /// No auto-sync job exists for the pairing.
    #[error("auto-sync not running for pairing: {0}")]
    AutoSyncNotRunning(String),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error("selection failed: {0}")]
    Selector(#[from] SelectorError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
