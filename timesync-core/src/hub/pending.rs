//! In-flight measurement correlation.

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::model::SyncRecord;

/// Correlates the two TIME_REQUEST messages of one measurement with their
/// responses. Created at dispatch, removed on completion or timeout,
/// whichever comes first.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub request_id: String,
    pub pairing_id: String,
    pub device1_id: String,
    pub device2_id: String,
    /// Device timestamps (ms), filled as responses arrive.
    pub device1_response: Option<i64>,
    pub device2_response: Option<i64>,
    /// Server clock at dispatch (ms).
    pub server_request_time: i64,
    /// Request send times (μs); 0 until the dispatch task records them.
    pub device1_send_time: i64,
    pub device2_send_time: i64,
    /// Response receive times (μs), sampled before taking the hub lock.
    pub device1_receive_time: Option<i64>,
    pub device2_receive_time: Option<i64>,
    /// Single-shot result channel back to the dispatcher.
    pub result_tx: Option<oneshot::Sender<SyncRecord>>,
    /// Timeout task, aborted when both responses arrive first.
    pub timeout_task: Option<AbortHandle>,
}

impl PendingRequest {
    pub fn new(
        request_id: String,
        pairing_id: String,
        device1_id: String,
        device2_id: String,
        server_request_time: i64,
        result_tx: oneshot::Sender<SyncRecord>,
    ) -> Self {
        PendingRequest {
            request_id,
            pairing_id,
            device1_id,
            device2_id,
            device1_response: None,
            device2_response: None,
            server_request_time,
            device1_send_time: 0,
            device2_send_time: 0,
            device1_receive_time: None,
            device2_receive_time: None,
            result_tx: Some(result_tx),
            timeout_task: None,
        }
    }

    pub fn has_both_responses(&self) -> bool {
        self.device1_response.is_some() && self.device2_response.is_some()
    }
}
