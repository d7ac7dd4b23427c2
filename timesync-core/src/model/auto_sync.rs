//! Auto-sync scheduler state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of an auto-sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AutoSyncStatus {
    Running,
    Stopped,
    Failed,
}

/// Parameters of a periodic burst schedule for one pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSyncConfig {
    pub pairing_id: String,
    /// Seconds between bursts; 0 falls back to 60.
    #[serde(default)]
    pub interval_sec: u64,
    /// Samples per burst; 0 falls back to 8.
    #[serde(default)]
    pub sample_count: usize,
    /// Gap between samples in milliseconds; 0 falls back to 200.
    #[serde(default)]
    pub interval_ms: u64,
}

/// Snapshot of a running auto-sync job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoSyncJob {
    pub pairing_id: String,
    pub status: AutoSyncStatus,
    pub config: AutoSyncConfig,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub total_syncs: u64,
    pub failed_syncs: u64,
}
