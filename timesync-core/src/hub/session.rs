//! Per-device session state.
//!
//! A session exists between registration and unregistration. Its keepalive
//! fields are written by the transport's ping ticker and the hub's PONG
//! handler, and read by the health query and dead-detector paths; all of
//! that happens under the hub lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::model::{DeviceHealth, DeviceKind};
use crate::protocol::WireMessage;

/// Outbound queue depth per session. Overflow is fatal for the session.
pub const SEND_BUFFER: usize = 256;

/// Application-level PING cadence.
pub const APP_PING_PERIOD: Duration = Duration::from_secs(40);

/// Transport-level ping cadence (nine tenths of the pong deadline).
pub const TRANSPORT_PING_PERIOD: Duration = Duration::from_secs(54);

/// A low-level pong must be observed within this window or the read side
/// fails.
pub const TRANSPORT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Time allowed for a single outbound write.
pub const WRITE_WAIT: Duration = Duration::from_secs(10);

const UNHEALTHY_AFTER_MS: i64 = 90_000;
const DEAD_AFTER_MS: i64 = 120_000;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Keepalive-derived liveness of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    /// Last application-level PONG within 90 s.
    Healthy,
    /// 90-120 s since the last PONG.
    Unhealthy,
    /// More than 120 s since the last PONG; the session is force-closed.
    Dead,
}

impl Liveness {
    /// Classifies a session by the time since its last application-level
    /// PONG.
    pub fn classify(since_last_pong: chrono::Duration) -> Liveness {
        let ms = since_last_pong.num_milliseconds();
        if ms < UNHEALTHY_AFTER_MS {
            Liveness::Healthy
        } else if ms <= DEAD_AFTER_MS {
            Liveness::Unhealthy
        } else {
            Liveness::Dead
        }
    }
}

/// A live bidirectional channel to one device.
#[derive(Debug)]
pub struct Session {
    pub device_id: String,
    pub kind: DeviceKind,
    pub connected_at: DateTime<Utc>,
    pub last_ping_sent: DateTime<Utc>,
    pub last_pong_recv: DateTime<Utc>,
    /// Last application-level round trip in milliseconds.
    pub last_rtt: i64,
    token: u64,
    sender: mpsc::Sender<WireMessage>,
}

impl Session {
    /// Creates session state around an outbound queue. The transport side
    /// keeps the receiving half and drains it onto the wire.
    pub fn new(device_id: String, kind: DeviceKind, sender: mpsc::Sender<WireMessage>) -> Self {
        let now = Utc::now();
        Session {
            device_id,
            kind,
            connected_at: now,
            last_ping_sent: now,
            last_pong_recv: now,
            last_rtt: 0,
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            sender,
        }
    }

    /// Identity of this particular registration. A reconnecting device gets
    /// a new token, so a teardown signal from a stale session cannot remove
    /// its replacement.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Enqueues an outbound message without blocking.
    pub(crate) fn enqueue(
        &self,
        msg: WireMessage,
    ) -> Result<(), mpsc::error::TrySendError<WireMessage>> {
        self.sender.try_send(msg)
    }

    /// Clones the outbound queue handle for use outside the hub lock.
    pub(crate) fn sender(&self) -> mpsc::Sender<WireMessage> {
        self.sender.clone()
    }

    /// Liveness at the given instant.
    pub fn liveness(&self, now: DateTime<Utc>) -> Liveness {
        Liveness::classify(now.signed_duration_since(self.last_pong_recv))
    }

    /// Health snapshot at the given instant.
    pub fn health(&self, now: DateTime<Utc>) -> DeviceHealth {
        let since_pong = now.signed_duration_since(self.last_pong_recv);
        let liveness = Liveness::classify(since_pong);
        DeviceHealth {
            device_id: self.device_id.clone(),
            kind: self.kind,
            connected_at: self.connected_at,
            last_ping_sent: self.last_ping_sent,
            last_pong_recv: self.last_pong_recv,
            last_rtt: self.last_rtt,
            liveness,
            is_healthy: liveness == Liveness::Healthy,
            time_since_last_pong: since_pong.num_milliseconds(),
        }
    }
}
