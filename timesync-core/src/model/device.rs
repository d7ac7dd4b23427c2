//! Devices, pairings, and per-session health.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::hub::Liveness;

/// Kind of device on the measurement plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceKind {
    /// Polysomnography recorder.
    Psg,
    /// Wrist-worn wearable.
    Watch,
    /// Companion mobile device.
    Mobile,
}

impl DeviceKind {
    /// Short string form, as used on the wire and in storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Psg => "PSG",
            DeviceKind::Watch => "WATCH",
            DeviceKind::Mobile => "MOBILE",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when parsing a device kind from an unknown string.
#[derive(Error, Debug)]
#[error("unknown device type: {0}")]
pub struct UnknownDeviceKind(pub String);

impl FromStr for DeviceKind {
    type Err = UnknownDeviceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PSG" => Ok(DeviceKind::Psg),
            "WATCH" => Ok(DeviceKind::Watch),
            "MOBILE" => Ok(DeviceKind::Mobile),
            other => Err(UnknownDeviceKind(other.to_string())),
        }
    }
}

/// A currently connected device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    #[serde(rename = "deviceType")]
    pub kind: DeviceKind,
    pub connected_at: DateTime<Utc>,
}

/// Keepalive-derived health of a connected device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHealth {
    pub device_id: String,
    #[serde(rename = "deviceType")]
    pub kind: DeviceKind,
    pub connected_at: DateTime<Utc>,
    pub last_ping_sent: DateTime<Utc>,
    pub last_pong_recv: DateTime<Utc>,
    /// Last application-level round trip in milliseconds.
    pub last_rtt: i64,
    pub liveness: Liveness,
    pub is_healthy: bool,
    /// Milliseconds since the last application-level PONG.
    pub time_since_last_pong: i64,
}

/// An in-memory pairing of two devices. Exists only while both devices have
/// active sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pairing {
    pub pairing_id: String,
    pub device1_id: String,
    pub device2_id: String,
    pub created_at: DateTime<Utc>,
}

/// A durable pairing record, including the auto-sync parameters to restore
/// when both devices reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentPairing {
    pub pairing_id: String,
    pub device1_id: String,
    pub device2_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_sync_interval_sec: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_sync_sample_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_sync_interval_ms: Option<u64>,
}

impl PersistentPairing {
    /// View of the durable record as an in-memory pairing.
    pub fn as_pairing(&self) -> Pairing {
        Pairing {
            pairing_id: self.pairing_id.clone(),
            device1_id: self.device1_id.clone(),
            device2_id: self.device2_id.clone(),
            created_at: self.created_at,
        }
    }

    /// The counterpart of `device_id` in this pairing.
    pub fn other_device(&self, device_id: &str) -> &str {
        if self.device1_id == device_id {
            &self.device2_id
        } else {
            &self.device1_id
        }
    }
}
