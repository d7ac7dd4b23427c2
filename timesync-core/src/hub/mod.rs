//! Session Hub
//!
//! The concurrent state machine at the center of the broker: it owns the
//! device sessions, the in-memory pairings, and the in-flight measurement
//! requests, all guarded by a single lock. Registration events flow through
//! an event channel consumed by [`Hub::run`]; a background detector closes
//! sessions whose application-level keepalive has gone quiet.

mod pending;
mod session;

pub use session::{
    Liveness, Session, APP_PING_PERIOD, SEND_BUFFER, TRANSPORT_PING_PERIOD, TRANSPORT_PONG_WAIT,
    WRITE_WAIT,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock;
use crate::model::{Device, DeviceHealth, Pairing, SyncRecord, SyncStatus};
use crate::protocol::WireMessage;
use pending::PendingRequest;

/// How often the dead-session detector runs.
const DEAD_DETECT_INTERVAL: Duration = Duration::from_secs(30);

/// Hub error types.
#[derive(Error, Debug)]
pub enum HubError {
    #[error("device not connected: {0}")]
    DeviceNotConnected(String),

    #[error("pairing not found: {0}")]
    PairingNotFound(String),

    #[error("measurement cancelled before completion")]
    Cancelled,
}

/// Session lifecycle events consumed by the hub's event loop.
#[derive(Debug)]
pub enum HubEvent {
    Register(Session),
    Unregister { device_id: String, token: u64 },
}

/// Capability the hub invokes when a device registers. Implemented by the
/// pairing operator; held behind a setter to break the construction cycle
/// between the two.
pub trait DeviceConnectedListener: Send + Sync {
    fn on_device_connected(&self, device_id: &str);
}

#[derive(Default)]
struct HubInner {
    sessions: HashMap<String, Session>,
    pairings: HashMap<String, Pairing>,
    pending: HashMap<String, PendingRequest>,
}

enum Slot {
    Device1,
    Device2,
}

/// Registry of device sessions and pairings; dispatches measurement
/// requests and correlates their responses.
pub struct Hub {
    inner: RwLock<HubInner>,
    events_tx: mpsc::Sender<HubEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<HubEvent>>>,
    listener: RwLock<Option<Arc<dyn DeviceConnectedListener>>>,
}

impl Hub {
    pub fn new() -> Arc<Hub> {
        let (events_tx, events_rx) = mpsc::channel(64);
        Arc::new(Hub {
            inner: RwLock::new(HubInner::default()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            listener: RwLock::new(None),
        })
    }

    /// Sets the device-connected listener. Called once after construction.
    pub fn set_connect_listener(&self, listener: Arc<dyn DeviceConnectedListener>) {
        *self.listener.write().unwrap() = Some(listener);
    }

    /// Consumes lifecycle events and runs the dead-session detector.
    pub async fn run(self: Arc<Self>) {
        let mut events = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .expect("hub event loop already running");

        let detector = Arc::clone(&self);
        tokio::spawn(async move { detector.detect_dead_sessions().await });

        while let Some(event) = events.recv().await {
            match event {
                HubEvent::Register(session) => self.register_session(session),
                HubEvent::Unregister { device_id, token } => {
                    self.unregister_session(&device_id, token)
                }
            }
        }
    }

    /// Queues a registration event for the event loop.
    pub async fn register(&self, session: Session) {
        let _ = self.events_tx.send(HubEvent::Register(session)).await;
    }

    /// Queues an unregistration event for the event loop.
    pub async fn unregister(&self, device_id: &str, token: u64) {
        let _ = self
            .events_tx
            .send(HubEvent::Unregister {
                device_id: device_id.to_string(),
                token,
            })
            .await;
    }

    /// Installs a session, replacing any older session for the same device.
    /// Emits the one-shot CONNECTED message and notifies the connect
    /// listener.
    pub fn register_session(&self, session: Session) {
        let device_id = session.device_id.clone();
        let kind = session.kind;

        {
            let mut inner = self.inner.write().unwrap();
            if inner
                .sessions
                .insert(device_id.clone(), session)
                .is_some()
            {
                info!("Session replaced for device {}", device_id);
            }
        }
        info!("Device registered: {} ({})", device_id, kind);

        let connected = WireMessage::Connected {
            device_id: device_id.clone(),
            server_time: clock::now_millis(),
        };
        self.enqueue_to_device(&device_id, connected);

        let listener = self.listener.read().unwrap().clone();
        if let Some(listener) = listener {
            let id = device_id.clone();
            tokio::spawn(async move { listener.on_device_connected(&id) });
        }
    }

    /// Removes a session and every in-memory pairing that references the
    /// device. Durable pairings are untouched. The stale-token case (the
    /// device already reconnected) is a no-op.
    pub fn unregister_session(&self, device_id: &str, token: u64) {
        let mut inner = self.inner.write().unwrap();
        match inner.sessions.get(device_id) {
            Some(session) if session.token() == token => {}
            _ => return,
        }
        inner.sessions.remove(device_id);
        info!("Device unregistered: {}", device_id);

        inner.pairings.retain(|pairing_id, pairing| {
            let keep = pairing.device1_id != device_id && pairing.device2_id != device_id;
            if !keep {
                info!("Pairing removed: {}", pairing_id);
            }
            keep
        });
    }

    /// Periodically force-closes sessions whose keepalive went quiet.
    async fn detect_dead_sessions(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(DEAD_DETECT_INTERVAL);
        loop {
            ticker.tick().await;

            let now = Utc::now();
            let dead: Vec<(String, u64)> = {
                let inner = self.inner.read().unwrap();
                inner
                    .sessions
                    .values()
                    .filter(|s| s.liveness(now) == Liveness::Dead)
                    .map(|s| (s.device_id.clone(), s.token()))
                    .collect()
            };

            for (device_id, token) in dead {
                warn!("Dead session detected: {} (no PONG)", device_id);
                self.unregister(&device_id, token).await;
            }
        }
    }

    // === Inbound messages ===

    /// Routes one inbound frame from a device. Malformed payloads and
    /// unknown types are logged and dropped.
    pub fn handle_message(&self, device_id: &str, raw: &str) {
        debug!("Inbound from {}: {}", device_id, raw);

        let msg: WireMessage = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Undecodable message from {}: {}", device_id, e);
                return;
            }
        };

        match msg {
            WireMessage::TimeResponse {
                request_id,
                timestamp,
            } => self.handle_time_response(device_id, &request_id, timestamp),
            WireMessage::Ping { .. } => self.handle_ping(device_id),
            WireMessage::Pong { .. } => self.handle_pong(device_id),
            other => {
                warn!("Unexpected message from {}: {:?}", device_id, other);
            }
        }
    }

    fn handle_time_response(&self, device_id: &str, request_id: &str, timestamp: i64) {
        // Sampled before taking the lock so queueing does not inflate RTT.
        let receive_time = clock::now_micros();

        let mut inner = self.inner.write().unwrap();
        let Some(pending) = inner.pending.get_mut(request_id) else {
            warn!("No pending request for response id {}", request_id);
            return;
        };

        if device_id == pending.device1_id {
            pending.device1_response = Some(timestamp);
            pending.device1_receive_time = Some(receive_time);
        } else if device_id == pending.device2_id {
            pending.device2_response = Some(timestamp);
            pending.device2_receive_time = Some(receive_time);
        } else {
            warn!(
                "Response for {} from device {} outside the pairing",
                request_id, device_id
            );
            return;
        }

        if pending.has_both_responses() {
            complete_request(&mut inner, request_id);
        }
    }

    fn handle_ping(&self, device_id: &str) {
        let pong = WireMessage::Pong {
            timestamp: clock::now_millis(),
        };
        self.enqueue_to_device(device_id, pong);
    }

    /// Enqueues a message on a device's send queue. Queue overflow is fatal
    /// for the session: the device is no longer draining its socket, so the
    /// session is torn down.
    fn enqueue_to_device(&self, device_id: &str, msg: WireMessage) {
        let result = {
            let inner = self.inner.read().unwrap();
            match inner.sessions.get(device_id) {
                Some(session) => session.enqueue(msg),
                None => return,
            }
        };
        if let Err(e) = result {
            warn!("Failed to send to device {}: {}", device_id, e);
            if matches!(e, mpsc::error::TrySendError::Full(_)) {
                self.teardown_session(device_id);
            }
        }
    }

    /// Queues an unregister event for the device's current session.
    fn teardown_session(&self, device_id: &str) {
        let token = {
            let inner = self.inner.read().unwrap();
            inner.sessions.get(device_id).map(|s| s.token())
        };
        if let Some(token) = token {
            warn!("Tearing down session for {}: send queue overflow", device_id);
            let events = self.events_tx.clone();
            let device_id = device_id.to_string();
            tokio::spawn(async move {
                let _ = events.send(HubEvent::Unregister { device_id, token }).await;
            });
        }
    }

    fn handle_pong(&self, device_id: &str) {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap();
        if let Some(session) = inner.sessions.get_mut(device_id) {
            session.last_pong_recv = now;
            session.last_rtt = now
                .signed_duration_since(session.last_ping_sent)
                .num_milliseconds();
        }
    }

    /// Records that an application-level PING is about to go out and returns
    /// its timestamp, or `None` when the session is gone.
    pub fn record_ping_sent(&self, device_id: &str) -> Option<i64> {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap();
        let session = inner.sessions.get_mut(device_id)?;
        session.last_ping_sent = now;
        Some(now.timestamp_millis())
    }

    // === Measurement dispatch ===

    /// Queries both devices of a pairing for their local clocks and blocks
    /// until both responses arrive or the timeout fires. The returned record
    /// carries whatever arrived; callers inspect its status.
    pub async fn request_time_sync(
        self: &Arc<Self>,
        pairing_id: &str,
        timeout: Duration,
    ) -> Result<SyncRecord, HubError> {
        let (pairing, sender1, sender2) = {
            let inner = self.inner.read().unwrap();
            let pairing = inner
                .pairings
                .get(pairing_id)
                .cloned()
                .ok_or_else(|| HubError::PairingNotFound(pairing_id.to_string()))?;
            let sender1 = inner
                .sessions
                .get(&pairing.device1_id)
                .ok_or_else(|| HubError::DeviceNotConnected(pairing.device1_id.clone()))?
                .sender();
            let sender2 = inner
                .sessions
                .get(&pairing.device2_id)
                .ok_or_else(|| HubError::DeviceNotConnected(pairing.device2_id.clone()))?
                .sender();
            (pairing, sender1, sender2)
        };

        let request_id = Uuid::new_v4().to_string();
        let (result_tx, result_rx) = oneshot::channel();
        let request = PendingRequest::new(
            request_id.clone(),
            pairing_id.to_string(),
            pairing.device1_id.clone(),
            pairing.device2_id.clone(),
            clock::now_millis(),
            result_tx,
        );

        {
            let mut inner = self.inner.write().unwrap();
            inner.pending.insert(request_id.clone(), request);
        }

        let timeout_hub = Arc::clone(self);
        let timeout_id = request_id.clone();
        let timeout_task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timeout_hub.handle_timeout(&timeout_id);
        });
        {
            let mut inner = self.inner.write().unwrap();
            if let Some(pending) = inner.pending.get_mut(&request_id) {
                pending.timeout_task = Some(timeout_task.abort_handle());
            }
        }

        // The two sends run independently; their on-wire order is not
        // guaranteed and a failed send is finalized by the timeout.
        self.dispatch_time_request(&request_id, pairing_id, Slot::Device1, &pairing.device1_id, sender1);
        self.dispatch_time_request(&request_id, pairing_id, Slot::Device2, &pairing.device2_id, sender2);

        result_rx.await.map_err(|_| HubError::Cancelled)
    }

    fn dispatch_time_request(
        self: &Arc<Self>,
        request_id: &str,
        pairing_id: &str,
        slot: Slot,
        device_id: &str,
        sender: mpsc::Sender<WireMessage>,
    ) {
        let hub = Arc::clone(self);
        let request_id = request_id.to_string();
        let device_id = device_id.to_string();
        let msg = WireMessage::TimeRequest {
            request_id: request_id.clone(),
            pairing_id: pairing_id.to_string(),
        };

        tokio::spawn(async move {
            let send_time = clock::now_micros();
            {
                let mut inner = hub.inner.write().unwrap();
                if let Some(pending) = inner.pending.get_mut(&request_id) {
                    match slot {
                        Slot::Device1 => pending.device1_send_time = send_time,
                        Slot::Device2 => pending.device2_send_time = send_time,
                    }
                }
            }
            if let Err(e) = sender.try_send(msg) {
                warn!(
                    "Failed to send time request to {} ({}): {}",
                    device_id, request_id, e
                );
                if matches!(e, mpsc::error::TrySendError::Full(_)) {
                    hub.teardown_session(&device_id);
                }
            }
        });
    }

    fn handle_timeout(&self, request_id: &str) {
        let mut inner = self.inner.write().unwrap();
        if inner.pending.contains_key(request_id) {
            warn!("Measurement timed out: {}", request_id);
            complete_request(&mut inner, request_id);
        }
    }

    // === Pair lifecycle ===

    /// Creates an in-memory pairing; both devices must be registered.
    pub fn create_pairing(&self, device1_id: &str, device2_id: &str) -> Result<Pairing, HubError> {
        let mut inner = self.inner.write().unwrap();

        if !inner.sessions.contains_key(device1_id) {
            return Err(HubError::DeviceNotConnected(device1_id.to_string()));
        }
        if !inner.sessions.contains_key(device2_id) {
            return Err(HubError::DeviceNotConnected(device2_id.to_string()));
        }

        let pairing = Pairing {
            pairing_id: Uuid::new_v4().to_string(),
            device1_id: device1_id.to_string(),
            device2_id: device2_id.to_string(),
            created_at: Utc::now(),
        };
        inner
            .pairings
            .insert(pairing.pairing_id.clone(), pairing.clone());
        info!(
            "Pairing created: {} ({} <-> {})",
            pairing.pairing_id, device1_id, device2_id
        );

        Ok(pairing)
    }

    /// Removes an in-memory pairing. Durable deletion is the caller's
    /// responsibility.
    pub fn delete_pairing(&self, pairing_id: &str) -> Result<(), HubError> {
        let mut inner = self.inner.write().unwrap();
        if inner.pairings.remove(pairing_id).is_none() {
            return Err(HubError::PairingNotFound(pairing_id.to_string()));
        }
        info!("Pairing deleted: {}", pairing_id);
        Ok(())
    }

    /// Idempotently reinstalls a pairing once both devices are registered
    /// again.
    pub fn restore_pairing(&self, pairing: Pairing) -> Result<(), HubError> {
        let mut inner = self.inner.write().unwrap();

        if inner.pairings.contains_key(&pairing.pairing_id) {
            return Ok(());
        }
        if !inner.sessions.contains_key(&pairing.device1_id) {
            return Err(HubError::DeviceNotConnected(pairing.device1_id));
        }
        if !inner.sessions.contains_key(&pairing.device2_id) {
            return Err(HubError::DeviceNotConnected(pairing.device2_id));
        }

        inner
            .pairings
            .insert(pairing.pairing_id.clone(), pairing);
        Ok(())
    }

    // === Read-only queries ===

    pub fn is_device_connected(&self, device_id: &str) -> bool {
        self.inner.read().unwrap().sessions.contains_key(device_id)
    }

    pub fn is_pairing_restored(&self, pairing_id: &str) -> bool {
        self.inner.read().unwrap().pairings.contains_key(pairing_id)
    }

    pub fn connected_devices(&self) -> Vec<Device> {
        let inner = self.inner.read().unwrap();
        inner
            .sessions
            .values()
            .map(|s| Device {
                device_id: s.device_id.clone(),
                kind: s.kind,
                connected_at: s.connected_at,
            })
            .collect()
    }

    pub fn pairings(&self) -> Vec<Pairing> {
        let inner = self.inner.read().unwrap();
        inner.pairings.values().cloned().collect()
    }

    /// Health snapshots for every connected device.
    pub fn device_health(&self) -> Vec<DeviceHealth> {
        let now = Utc::now();
        let inner = self.inner.read().unwrap();
        inner.sessions.values().map(|s| s.health(now)).collect()
    }

    /// Health snapshot for one device.
    pub fn device_health_by_id(&self, device_id: &str) -> Result<DeviceHealth, HubError> {
        let now = Utc::now();
        let inner = self.inner.read().unwrap();
        inner
            .sessions
            .get(device_id)
            .map(|s| s.health(now))
            .ok_or_else(|| HubError::DeviceNotConnected(device_id.to_string()))
    }
}

/// Finalizes one pending request: stops its timer, derives RTTs, raw offset
/// and status from whatever arrived, delivers the record over the one-shot
/// channel, and evicts the entry. Runs under the hub's write lock and is the
/// single completion path for both the response and the timeout side.
fn complete_request(inner: &mut HubInner, request_id: &str) {
    let Some(mut pending) = inner.pending.remove(request_id) else {
        return;
    };

    if let Some(handle) = pending.timeout_task.take() {
        handle.abort();
    }

    let server_response_time = clock::now_millis();

    let (status, error_message) = if pending.has_both_responses() {
        (SyncStatus::Success, None)
    } else if pending.device1_response.is_some() || pending.device2_response.is_some() {
        (
            SyncStatus::Partial,
            Some("One or more devices did not respond".to_string()),
        )
    } else {
        (
            SyncStatus::Failed,
            Some("Both devices failed to respond".to_string()),
        )
    };

    let device1_type = inner.sessions.get(&pending.device1_id).map(|s| s.kind);
    let device2_type = inner.sessions.get(&pending.device2_id).map(|s| s.kind);

    let device1_rtt = match (pending.device1_receive_time, pending.device1_send_time) {
        (Some(recv), send) if send > 0 => Some(recv - send),
        _ => None,
    };
    let device2_rtt = match (pending.device2_receive_time, pending.device2_send_time) {
        (Some(recv), send) if send > 0 => Some(recv - send),
        _ => None,
    };

    // Raw offset only; the selector applies network compensation during
    // multi-sampling.
    let time_difference = match (pending.device1_response, pending.device2_response) {
        (Some(t1), Some(t2)) => Some(t1 - t2),
        _ => None,
    };

    let record = SyncRecord {
        id: 0,
        device1_id: pending.device1_id.clone(),
        device1_type,
        device1_timestamp: pending.device1_response,
        device2_id: pending.device2_id.clone(),
        device2_type,
        device2_timestamp: pending.device2_response,
        server_request_time: pending.server_request_time,
        server_response_time: Some(server_response_time),
        device1_rtt,
        device2_rtt,
        time_difference,
        status,
        error_message,
        created_at: clock::now_millis(),
    };

    if let Some(tx) = pending.result_tx.take() {
        let _ = tx.send(record);
    }
}
