//! HTTP Operator Plane
//!
//! REST endpoints for dashboards and operators: pairing management,
//! on-demand measurements, history queries, auto-sync control, device
//! health, and service health/metrics.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use timesync_core::config::Config;
use timesync_core::hub::{Hub, HubError};
use timesync_core::model::{
    AggregatedResult, AutoSyncConfig, AutoSyncJob, MultiSyncRequest, Pairing, PersistentPairing,
    SyncRecord,
};
use timesync_core::service::{AutoSyncMonitor, ServiceError, SyncService};
use timesync_core::storage::{Repository, StorageError};

use crate::metrics::BrokerMetrics;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub service: Arc<SyncService>,
    pub monitor: Arc<AutoSyncMonitor>,
    pub hub: Arc<Hub>,
    pub repo: Arc<Repository>,
    pub config: Arc<Config>,
    pub metrics: BrokerMetrics,
    pub start_time: Instant,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePairingRequest {
    device1_id: String,
    device2_id: String,
    auto_sync_interval_sec: Option<u64>,
    auto_sync_sample_count: Option<usize>,
    auto_sync_interval_ms: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePairingResponse {
    pairing_id: String,
}

#[derive(Serialize)]
struct SyncResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<SyncRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct MultiSyncResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<AggregatedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Deserialize)]
struct AutoSyncStartRequest {
    pairing_id: String,
    #[serde(default)]
    interval_sec: Option<u64>,
    #[serde(default)]
    sample_count: Option<usize>,
    #[serde(default)]
    interval_ms: Option<u64>,
}

#[derive(Serialize)]
struct AutoSyncStatusResponse {
    jobs: Vec<AutoSyncJob>,
}

#[derive(Deserialize)]
struct DeviceQuery {
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
}

#[derive(Deserialize)]
struct PairingQuery {
    #[serde(rename = "pairingId")]
    pairing_id: Option<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(rename = "deviceId")]
    device_id: Option<String>,
    #[serde(rename = "pairingId")]
    pairing_id: Option<String>,
    #[serde(rename = "startTime")]
    start_time: Option<String>,
    #[serde(rename = "endTime")]
    end_time: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// Creates the operator-plane router.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/devices", get(get_devices))
        .route("/devices/health", get(get_device_health))
        .route("/pairings", get(get_pairings).post(create_pairing))
        .route("/pairings/:pairingId", delete(delete_pairing))
        .route("/sync/multi", post(request_multi_sync))
        .route("/sync/:pairingId", post(request_sync))
        .route("/sync/records", get(get_sync_records))
        .route("/sync/records/:recordId", get(get_sync_record))
        .route("/sync/aggregated", get(get_aggregated_results))
        .route("/sync/aggregated/:aggregationId", get(get_aggregated_result))
        .route("/auto-sync/start", post(start_auto_sync))
        .route("/auto-sync/stop/:pairingId", post(stop_auto_sync))
        .route("/auto-sync/status", get(get_auto_sync_status))
        .with_state(state)
}

// === Error mapping ===

fn service_error_status(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::SelfPair => StatusCode::BAD_REQUEST,
        ServiceError::AllSamplesFailed(_) | ServiceError::Selector(_) => StatusCode::BAD_REQUEST,
        ServiceError::AutoSyncAlreadyRunning(_) => StatusCode::CONFLICT,
        ServiceError::AutoSyncNotRunning(_) => StatusCode::NOT_FOUND,
        ServiceError::Hub(HubError::DeviceNotConnected(_)) => StatusCode::NOT_FOUND,
        ServiceError::Hub(HubError::PairingNotFound(_)) => StatusCode::NOT_FOUND,
        ServiceError::Hub(HubError::Cancelled) => StatusCode::INTERNAL_SERVER_ERROR,
        ServiceError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        ServiceError::Storage(StorageError::PairingExists(_, _)) => StatusCode::CONFLICT,
        ServiceError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn service_error_response(err: &ServiceError) -> Response {
    (
        service_error_status(err),
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

// === Service health ===

async fn health(State(state): State<HttpState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

async fn metrics(State(state): State<HttpState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        state.metrics.encode(),
    )
}

// === Devices ===

async fn get_devices(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.service.connected_devices())
}

async fn get_device_health(
    State(state): State<HttpState>,
    Query(query): Query<DeviceQuery>,
) -> Response {
    match query.device_id {
        Some(device_id) => match state.hub.device_health_by_id(&device_id) {
            Ok(health) => Json(health).into_response(),
            Err(e) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response(),
        },
        None => Json(state.hub.device_health()).into_response(),
    }
}

// === Pairings ===

async fn get_pairings(State(state): State<HttpState>) -> Response {
    match state.repo.get_all_pairings() {
        Ok(pairings) => {
            let pairings: Vec<Pairing> = pairings.iter().map(|p| p.as_pairing()).collect();
            Json(pairings).into_response()
        }
        Err(e) => service_error_response(&ServiceError::Storage(e)),
    }
}

async fn create_pairing(
    State(state): State<HttpState>,
    Json(req): Json<CreatePairingRequest>,
) -> Response {
    let pairing = match state.service.create_pairing(&req.device1_id, &req.device2_id) {
        Ok(pairing) => pairing,
        Err(e) => return service_error_response(&e),
    };

    // Request values win over the server defaults.
    let interval_sec = req
        .auto_sync_interval_sec
        .unwrap_or(state.config.auto_sync_interval_sec);
    let sample_count = req
        .auto_sync_sample_count
        .unwrap_or(state.config.auto_sync_sample_count);
    let interval_ms = req
        .auto_sync_interval_ms
        .unwrap_or(state.config.auto_sync_interval_ms);

    // Durability is best effort: the in-memory pairing stays usable even
    // when the save fails, and the next healthy save reconciles.
    let persistent = PersistentPairing {
        pairing_id: pairing.pairing_id.clone(),
        device1_id: pairing.device1_id.clone(),
        device2_id: pairing.device2_id.clone(),
        created_at: pairing.created_at,
        auto_sync_interval_sec: Some(interval_sec),
        auto_sync_sample_count: Some(sample_count),
        auto_sync_interval_ms: Some(interval_ms),
    };
    if let Err(e) = state.repo.save_pairing(&persistent) {
        warn!("Failed to save pairing {}: {}", pairing.pairing_id, e);
    }

    let auto_sync = AutoSyncConfig {
        pairing_id: pairing.pairing_id.clone(),
        interval_sec,
        sample_count,
        interval_ms,
    };
    match state.monitor.start(auto_sync) {
        Ok(()) => info!(
            "Auto-sync started for pairing {} (interval: {}s, samples: {})",
            pairing.pairing_id, interval_sec, sample_count
        ),
        Err(e) => warn!(
            "Failed to start auto-sync for pairing {}: {}",
            pairing.pairing_id, e
        ),
    }

    (
        StatusCode::CREATED,
        Json(CreatePairingResponse {
            pairing_id: pairing.pairing_id,
        }),
    )
        .into_response()
}

async fn delete_pairing(
    State(state): State<HttpState>,
    Path(pairing_id): Path<String>,
) -> Response {
    // The durable record is the source of truth.
    if state.repo.get_pairing_by_id(&pairing_id).is_err() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "pairing not found" })),
        )
            .into_response();
    }

    // Best effort: the job may not be running and the devices may be
    // disconnected, neither blocks the durable delete.
    let _ = state.monitor.stop(&pairing_id);
    let _ = state.service.delete_pairing(&pairing_id);

    if let Err(e) = state.repo.delete_pairing(&pairing_id) {
        warn!("Failed to delete pairing {}: {}", pairing_id, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "failed to delete pairing" })),
        )
            .into_response();
    }

    info!("Pairing deleted: {}", pairing_id);
    Json(json!({ "message": "pairing deleted" })).into_response()
}

// === Measurements ===

async fn request_sync(State(state): State<HttpState>, Path(pairing_id): Path<String>) -> Response {
    state.metrics.measurements_total.inc();

    match state.service.request_time_sync(&pairing_id).await {
        Ok(record) => Json(SyncResponse {
            success: true,
            record: Some(record),
            error: None,
        })
        .into_response(),
        Err(e) => (
            service_error_status(&e),
            Json(SyncResponse {
                success: false,
                record: None,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

async fn request_multi_sync(
    State(state): State<HttpState>,
    Json(req): Json<MultiSyncRequest>,
) -> Response {
    if req.pairing_id.is_empty() {
        return bad_request("pairing_id is required");
    }
    state.metrics.bursts_total.inc();

    match state.service.request_multi_sync(&req).await {
        Ok(result) => Json(MultiSyncResponse {
            success: true,
            result: Some(result),
            error: None,
        })
        .into_response(),
        Err(e) => (
            service_error_status(&e),
            Json(MultiSyncResponse {
                success: false,
                result: None,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

// === Measurement history ===

async fn get_sync_records(
    State(state): State<HttpState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let result = if let Some(device_id) = &query.device_id {
        state
            .service
            .get_sync_records_by_device(device_id, limit, offset)
    } else if let (Some(start), Some(end)) = (&query.start_time, &query.end_time) {
        let (Some(start), Some(end)) = (parse_rfc3339(start), parse_rfc3339(end)) else {
            return bad_request("invalid time format, use RFC3339");
        };
        state
            .service
            .get_sync_records_by_time_range(start, end, limit, offset)
    } else {
        state.service.get_sync_records(limit, offset)
    };

    match result {
        Ok(records) => Json(records).into_response(),
        Err(e) => service_error_response(&e),
    }
}

async fn get_sync_record(State(state): State<HttpState>, Path(record_id): Path<i64>) -> Response {
    match state.service.get_sync_record(record_id) {
        Ok(record) => Json(record).into_response(),
        Err(e) => service_error_response(&e),
    }
}

async fn get_aggregated_results(
    State(state): State<HttpState>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let result = if let Some(pairing_id) = &query.pairing_id {
        state
            .service
            .get_aggregated_results_by_pairing(pairing_id, limit, offset)
    } else if let (Some(start), Some(end)) = (&query.start_time, &query.end_time) {
        let (Some(start), Some(end)) = (parse_rfc3339(start), parse_rfc3339(end)) else {
            return bad_request("invalid time format, use RFC3339");
        };
        state
            .service
            .get_aggregated_results_by_time_range(start, end, limit, offset)
    } else {
        state.service.get_aggregated_results(limit, offset)
    };

    match result {
        Ok(results) => Json(results).into_response(),
        Err(e) => service_error_response(&e),
    }
}

async fn get_aggregated_result(
    State(state): State<HttpState>,
    Path(aggregation_id): Path<String>,
) -> Response {
    match state.service.get_aggregated_result(&aggregation_id) {
        Ok(result) => Json(result).into_response(),
        Err(e) => service_error_response(&e),
    }
}

// === Auto-sync control ===

async fn start_auto_sync(
    State(state): State<HttpState>,
    Json(req): Json<AutoSyncStartRequest>,
) -> Response {
    if req.pairing_id.is_empty() {
        return bad_request("pairing_id is required");
    }

    let config = AutoSyncConfig {
        pairing_id: req.pairing_id.clone(),
        interval_sec: req.interval_sec.unwrap_or(0),
        sample_count: req.sample_count.unwrap_or(0),
        interval_ms: req.interval_ms.unwrap_or(0),
    };

    match state.monitor.start(config) {
        Ok(()) => Json(json!({
            "message": "auto-sync started",
            "pairing_id": req.pairing_id,
        }))
        .into_response(),
        Err(e) => service_error_response(&e),
    }
}

async fn stop_auto_sync(State(state): State<HttpState>, Path(pairing_id): Path<String>) -> Response {
    match state.monitor.stop(&pairing_id) {
        Ok(()) => Json(json!({
            "message": "auto-sync stopped",
            "pairing_id": pairing_id,
        }))
        .into_response(),
        Err(e) => service_error_response(&e),
    }
}

async fn get_auto_sync_status(
    State(state): State<HttpState>,
    Query(query): Query<PairingQuery>,
) -> Response {
    match query.pairing_id {
        Some(pairing_id) => match state.monitor.status(&pairing_id) {
            Ok(job) => Json(job).into_response(),
            Err(e) => service_error_response(&e),
        },
        None => Json(AutoSyncStatusResponse {
            jobs: state.monitor.all_statuses(),
        })
        .into_response(),
    }
}
