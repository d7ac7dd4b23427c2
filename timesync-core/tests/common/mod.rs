//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use tokio::sync::mpsc;

use timesync_core::clock;
use timesync_core::hub::{Hub, Session, SEND_BUFFER};
use timesync_core::model::{DeviceKind, SyncRecord, SyncStatus};
use timesync_core::protocol::WireMessage;

/// Builds a successful measurement record with the given round trips (μs)
/// and raw offset (ms).
pub fn test_record(id: i64, rtt1: i64, rtt2: i64, time_diff: i64) -> SyncRecord {
    SyncRecord {
        id,
        device1_id: "psg-001".to_string(),
        device1_type: Some(DeviceKind::Psg),
        device1_timestamp: Some(1_700_000_000_000),
        device2_id: "watch-001".to_string(),
        device2_type: Some(DeviceKind::Watch),
        device2_timestamp: Some(1_700_000_000_000 - time_diff),
        server_request_time: 1_700_000_000_000,
        server_response_time: Some(1_700_000_000_050),
        device1_rtt: Some(rtt1),
        device2_rtt: Some(rtt2),
        time_difference: Some(time_diff),
        status: SyncStatus::Success,
        error_message: None,
        created_at: 1_700_000_000_000 + id,
    }
}

/// Registers a session backed by an in-process queue and returns the
/// receiving half plus the session token.
pub fn fake_session(
    hub: &Arc<Hub>,
    device_id: &str,
    kind: DeviceKind,
) -> (mpsc::Receiver<WireMessage>, u64) {
    let (tx, rx) = mpsc::channel(SEND_BUFFER);
    let session = Session::new(device_id.to_string(), kind, tx);
    let token = session.token();
    hub.register_session(session);
    (rx, token)
}

/// Drives a fake device: answers every TIME_REQUEST with the local clock
/// shifted by `offset_ms`. Other messages are ignored.
pub fn spawn_echo_device(
    hub: Arc<Hub>,
    device_id: String,
    mut rx: mpsc::Receiver<WireMessage>,
    offset_ms: i64,
) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let WireMessage::TimeRequest { request_id, .. } = msg {
                let response = WireMessage::TimeResponse {
                    request_id,
                    timestamp: clock::now_millis() + offset_ms,
                };
                let raw = serde_json::to_string(&response).unwrap();
                hub.handle_message(&device_id, &raw);
            }
        }
    });
}
