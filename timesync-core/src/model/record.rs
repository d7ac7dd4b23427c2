//! Measurement records and aggregated results.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::DeviceKind;

/// Outcome of a single simultaneous measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    /// Both devices responded.
    Success,
    /// Exactly one device responded.
    Partial,
    /// Neither device responded.
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Partial => "PARTIAL",
            SyncStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One simultaneous measurement against a pairing.
///
/// `time_difference` is the raw offset `device1_timestamp - device2_timestamp`
/// in milliseconds; network-delay compensation is applied later by the
/// selector, never here. Round-trip times are microseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    /// Storage-assigned row id; 0 until persisted.
    pub id: i64,
    pub device1_id: String,
    pub device1_type: Option<DeviceKind>,
    /// Device 1 local wall clock in milliseconds; absent on timeout.
    pub device1_timestamp: Option<i64>,
    pub device2_id: String,
    pub device2_type: Option<DeviceKind>,
    pub device2_timestamp: Option<i64>,
    /// Server clock when the measurement was dispatched (ms).
    pub server_request_time: i64,
    /// Server clock when the measurement completed (ms).
    pub server_response_time: Option<i64>,
    /// Device 1 round trip in microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device1_rtt: Option<i64>,
    /// Device 2 round trip in microseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device2_rtt: Option<i64>,
    /// Raw offset `device1_timestamp - device2_timestamp` in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_difference: Option<i64>,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: i64,
}

/// Result of condensing one burst of measurements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub aggregation_id: String,
    pub pairing_id: String,

    /// Best offset in milliseconds (the median of compensated offsets).
    pub best_offset: i64,
    /// Median compensated offset in milliseconds.
    pub median_offset: i64,
    /// Mean compensated offset in milliseconds.
    pub mean_offset: f64,

    /// Standard deviation of compensated offsets.
    pub offset_std_dev: f64,
    /// Minimum total round trip in microseconds.
    pub min_rtt: i64,
    /// Maximum total round trip in microseconds.
    pub max_rtt: i64,
    /// Mean total round trip in microseconds.
    pub mean_rtt: f64,

    /// Confidence score in [0, 1].
    pub confidence: f64,
    /// Standard deviation of total round trips in microseconds.
    pub jitter: f64,

    pub total_samples: usize,
    pub valid_samples: usize,
    pub outlier_count: usize,

    /// All constituent measurement records, including ones the selection
    /// discarded (kept for audit).
    pub measurements: Vec<SyncRecord>,

    pub created_at: i64,
}

/// Parameters of a multi-sample measurement burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiSyncRequest {
    pub pairing_id: String,
    /// Samples per burst; out-of-range or absent falls back to 8, capped at 20.
    #[serde(default)]
    pub sample_count: Option<usize>,
    /// Gap between samples in milliseconds; absent falls back to 200.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    /// Per-sample timeout in seconds; absent falls back to 5.
    #[serde(default)]
    pub timeout_sec: Option<u64>,
}
