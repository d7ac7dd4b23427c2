//! Device Wire Protocol
//!
//! One JSON object per WebSocket text frame, tagged by a case-sensitive
//! `type` field. Unknown tags and malformed frames are logged and dropped by
//! the receiving side, never surfaced to a device.

use serde::{Deserialize, Serialize};

/// Default limit for inbound frames in bytes. Deployments may raise it via
/// `MAX_MESSAGE_SIZE`.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Messages exchanged between the broker and a device.
///
/// Timestamps are unix-epoch milliseconds of the sender's local clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Server → device, once per registration.
    #[serde(rename = "CONNECTED", rename_all = "camelCase")]
    Connected { device_id: String, server_time: i64 },

    /// Server → device, asking for the device's local wall clock.
    #[serde(rename = "TIME_REQUEST", rename_all = "camelCase")]
    TimeRequest { request_id: String, pairing_id: String },

    /// Device → server, answering a `TIME_REQUEST`.
    #[serde(rename = "TIME_RESPONSE", rename_all = "camelCase")]
    TimeResponse { request_id: String, timestamp: i64 },

    /// Application-level keepalive probe. Symmetric: either side may send,
    /// the other answers with `PONG`.
    #[serde(rename = "PING")]
    Ping { timestamp: i64 },

    /// Application-level keepalive answer.
    #[serde(rename = "PONG")]
    Pong { timestamp: i64 },

    /// Server → device error notification.
    #[serde(rename = "ERROR")]
    Error { code: String, message: String },
}
