//! REST API endpoints for the stroller-service.
//!
//! This module provides HTTP endpoints for initializing devices, sending
//! drive commands, querying tracked state, and managing the device directory.
//!
//! # Concurrency and Lock Acquisition
//!
//! All async handlers that access shared state acquire locks in a consistent order:
//!
//! - **`state.config`** (RwLock): Read lock for directory lookups, write lock for
//!   directory mutations. Multiple readers allowed; writers are exclusive.
//! - **`state.registry`** (per-device Mutex): Every state mutation goes through the
//!   registry, which serializes writes per device and persists inside the lock.
//! - **`state.store`** (Mutex): Acquired directly only for history queries. Held
//!   briefly; avoid long-running operations while holding this lock.
//!
//! ## Lock Ordering
//!
//! When multiple locks are needed, acquire in this order to prevent deadlocks:
//! 1. `config` (if needed)
//! 2. registry device entry (if needed)
//! 3. `store` (if needed)
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Store errors are
//! automatically converted and return HTTP 500. Client errors (not found, bad request,
//! conflict) return appropriate 4xx status codes.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use stroller_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

use stroller_types::{
    DeviceCommand, DeviceState, RemoteControl, Speed, StateEvent, Steering, StrollerMode,
};

use crate::config::DeviceConfig;
use crate::middleware::validate_device_id;
use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health
        .route("/api/health", get(health))
        // Device lifecycle
        .route("/api/initialize", post(initialize_device))
        // Drive commands
        .route("/api/mode", post(set_mode))
        .route("/api/speed", post(set_speed))
        .route("/api/steer", post(set_steering))
        .route("/api/remote", post(set_remote))
        // Distance tracking
        .route("/api/distance", get(get_distance))
        .route("/api/distance/reset", post(reset_distance))
        .route("/api/distance/halt", post(halt_distance))
        .route("/api/distance/resume", post(resume_distance))
        // State queries
        .route("/api/status", get(get_device_status))
        .route(
            "/api/temp_humidity",
            get(get_temp_humidity).put(set_temp_humidity),
        )
        // Device directory
        .route("/api/devices", get(list_devices).post(add_device))
        .route("/api/devices/{id}", delete(remove_device))
        .route("/api/devices/{id}/fixes", get(get_fixes))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub bus: BusHealth,
}

/// Telemetry bus health information.
#[derive(Debug, Serialize)]
pub struct BusHealth {
    /// Whether the bus task is running.
    pub running: bool,
    /// Current broker link state.
    pub connection: &'static str,
    /// When the bus was started.
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Telemetry messages ingested since startup.
    pub messages_received: u64,
    /// Messages dropped as unparseable.
    pub parse_failures: u64,
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        bus: BusHealth {
            running: state.bus.is_running(),
            connection: state.bus.connection().await.as_str(),
            started_at: state.bus.started_at(),
            messages_received: state.bus.messages_received(),
            parse_failures: state.bus.parse_failures(),
        },
    })
}

/// Request body naming a target device.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub device_id: String,
}

/// Initialize a device and open its telemetry subscriptions.
///
/// Only devices present in the directory can be initialized. Repeating the
/// call is safe: the existing state comes back with 200 instead of 201 and
/// nothing is reset.
///
/// # Errors
///
/// - [`AppError::NotFound`] if the device is not in the directory.
async fn initialize_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeviceRequest>,
) -> Result<(StatusCode, Json<DeviceState>), AppError> {
    {
        let config = state.config.read().await;
        if config.device(&request.device_id).is_none() {
            return Err(AppError::NotFound(format!(
                "Device {} is not in the directory",
                request.device_id
            )));
        }
    }

    let (snapshot, created) = state.registry.initialize(&request.device_id).await;
    state.open_device(&request.device_id).await;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(snapshot)))
}

/// Apply a state mutation, then fan out the matching command and event.
///
/// The registry persists the change before anything leaves the process.
/// Publish and broadcast failures are logged where they happen and do not
/// fail the request.
async fn apply_command(
    state: &AppState,
    device_id: &str,
    command: DeviceCommand,
    event: StateEvent,
    mutate: impl FnOnce(&mut DeviceState),
) -> Result<Json<DeviceState>, AppError> {
    let (_, snapshot) = state
        .registry
        .update(device_id, mutate)
        .await
        .ok_or_else(|| device_not_found(device_id))?;

    state.publish_command(device_id, command);
    state.broadcaster.publish(device_id, event).await;

    Ok(Json(snapshot))
}

fn device_not_found(device_id: &str) -> AppError {
    AppError::NotFound(format!("Device not found: {}", device_id))
}

/// Request to change a stroller's driving mode.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeRequest {
    pub device_id: String,
    pub mode: String,
}

/// Set the driving mode and forward the command to the stroller.
async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ModeRequest>,
) -> Result<Json<DeviceState>, AppError> {
    let mode = StrollerMode::from_name(&request.mode)
        .ok_or_else(|| AppError::BadRequest("Invalid mode".to_string()))?;

    apply_command(
        &state,
        &request.device_id,
        DeviceCommand::Mode(mode),
        StateEvent::ModeChange { mode },
        |device| device.mode = mode,
    )
    .await
}

/// Request to change a stroller's speed preset.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedRequest {
    pub device_id: String,
    pub speed: u8,
}

/// Set the speed preset and forward the command to the stroller.
async fn set_speed(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SpeedRequest>,
) -> Result<Json<DeviceState>, AppError> {
    let speed = Speed::try_from(request.speed)
        .map_err(|_| AppError::BadRequest("Invalid speed".to_string()))?;

    apply_command(
        &state,
        &request.device_id,
        DeviceCommand::Speed(speed),
        StateEvent::SpeedChange { speed },
        |device| device.speed = speed,
    )
    .await
}

/// Request to change a stroller's steering position.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SteerRequest {
    pub device_id: String,
    pub steering: f32,
}

/// Set the steering position and forward the command to the stroller.
async fn set_steering(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SteerRequest>,
) -> Result<Json<DeviceState>, AppError> {
    let steering = Steering::new(request.steering)
        .map_err(|_| AppError::BadRequest("Invalid steering value".to_string()))?;

    apply_command(
        &state,
        &request.device_id,
        DeviceCommand::Steer(steering),
        StateEvent::SetSteering { steering },
        |device| device.steering = Some(steering),
    )
    .await
}

/// Request to change which remote input drives a stroller.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRequest {
    pub device_id: String,
    pub remote: String,
}

/// Select the remote-control input and forward the command to the stroller.
async fn set_remote(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemoteRequest>,
) -> Result<Json<DeviceState>, AppError> {
    let remote = RemoteControl::from_name(&request.remote)
        .ok_or_else(|| AppError::BadRequest("Invalid remote control option".to_string()))?;

    apply_command(
        &state,
        &request.device_id,
        DeviceCommand::Remote(remote),
        StateEvent::SetRemote { remote },
        |device| device.remote = remote,
    )
    .await
}

/// Zero a device's accumulated distance and clear its recent GPS window.
///
/// Only the targeted device is touched. The persisted fix log is kept; it
/// is an append-only history, not part of the live counters.
async fn reset_distance(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeviceRequest>,
) -> Result<Json<DeviceState>, AppError> {
    apply_command(
        &state,
        &request.device_id,
        DeviceCommand::ResetDistance,
        StateEvent::ResetDistance { distance: 0.0 },
        |device| {
            device.distance_meters = 0.0;
            device.gps_history.clear();
        },
    )
    .await
}

/// Halt distance tracking; ingested fixes stop counting until resumed.
async fn halt_distance(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeviceRequest>,
) -> Result<Json<DeviceState>, AppError> {
    apply_command(
        &state,
        &request.device_id,
        DeviceCommand::Halt,
        StateEvent::HaltDistance { halted: true },
        |device| device.tracking_halted = true,
    )
    .await
}

/// Resume distance tracking.
async fn resume_distance(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeviceRequest>,
) -> Result<Json<DeviceState>, AppError> {
    apply_command(
        &state,
        &request.device_id,
        DeviceCommand::Resume,
        StateEvent::ResumeDistance { halted: false },
        |device| device.tracking_halted = false,
    )
    .await
}

/// Query string naming a target device.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceQuery {
    pub device_id: String,
}

/// Distance response.
#[derive(Debug, Serialize)]
pub struct DistanceResponse {
    pub distance: f64,
}

/// Get the accumulated travel distance for a device.
async fn get_distance(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<DistanceResponse>, AppError> {
    let snapshot = state
        .registry
        .snapshot(&query.device_id)
        .await
        .ok_or_else(|| device_not_found(&query.device_id))?;

    Ok(Json(DistanceResponse {
        distance: snapshot.distance_meters,
    }))
}

/// Get the full state record for a device.
async fn get_device_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<DeviceState>, AppError> {
    let snapshot = state
        .registry
        .snapshot(&query.device_id)
        .await
        .ok_or_else(|| device_not_found(&query.device_id))?;

    Ok(Json(snapshot))
}

/// Cabin climate response.
#[derive(Debug, Serialize)]
pub struct TempHumidityResponse {
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
}

/// Get the latest cabin readings for a device.
async fn get_temp_humidity(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeviceQuery>,
) -> Result<Json<TempHumidityResponse>, AppError> {
    let snapshot = state
        .registry
        .snapshot(&query.device_id)
        .await
        .ok_or_else(|| device_not_found(&query.device_id))?;

    Ok(Json(TempHumidityResponse {
        temperature: snapshot.temperature,
        humidity: snapshot.humidity,
    }))
}

/// Request to record a cabin climate reading.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempHumidityRequest {
    pub device_id: String,
    pub temperature: f32,
    pub humidity: f32,
}

/// Record a climate reading reported from the app side.
///
/// Nothing is published to the stroller: the reading originates outside it,
/// there is no command to send. Subscribed clients still get the event.
async fn set_temp_humidity(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TempHumidityRequest>,
) -> Result<Json<DeviceState>, AppError> {
    let (_, snapshot) = state
        .registry
        .update(&request.device_id, |device| {
            device.temperature = Some(request.temperature);
            device.humidity = Some(request.humidity);
        })
        .await
        .ok_or_else(|| device_not_found(&request.device_id))?;

    state
        .broadcaster
        .publish(
            &request.device_id,
            StateEvent::SetTempHumidity {
                temperature: request.temperature,
                humidity: request.humidity,
            },
        )
        .await;

    Ok(Json(snapshot))
}

/// Query parameters for the fix history.
#[derive(Debug, Deserialize, Default)]
pub struct FixesQuery {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl FixesQuery {
    /// Validate the query parameters.
    /// Returns an error if `since > until`.
    pub fn validate(&self) -> Result<(), AppError> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must be less than or equal to 'until' ({})",
                since, until
            )));
        }
        Ok(())
    }
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    /// The data items.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    /// Number of items returned.
    pub count: usize,
    /// Offset from the beginning.
    pub offset: u32,
    /// Maximum items requested (if specified).
    pub limit: Option<u32>,
    /// Whether there are more items available.
    pub has_more: bool,
}

/// Get persisted GPS fixes for a device, newest first.
///
/// Returns a paginated response with fixes and metadata about the results.
///
/// # Query Parameters
///
/// - `since`: Unix timestamp to filter fixes from (inclusive)
/// - `until`: Unix timestamp to filter fixes until (inclusive)
/// - `limit`: Maximum number of fixes to return
/// - `offset`: Number of fixes to skip (for pagination)
///
/// # Lock Acquisition
///
/// Acquires the store mutex for the duration of the database query.
/// Query parameters are validated before the lock is acquired.
///
/// # Errors
///
/// - Returns [`AppError::BadRequest`] if `since > until`
/// - Returns [`AppError::Store`] if the database query fails
async fn get_fixes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<FixesQuery>,
) -> Result<Json<PaginatedResponse<stroller_store::StoredGpsFix>>, AppError> {
    // Validate query parameters
    params.validate()?;

    let mut query = stroller_store::FixQuery::new().device(&id);

    if let Some(since) = params.since
        && let Ok(dt) = OffsetDateTime::from_unix_timestamp(since)
    {
        query = query.since(dt);
    }
    if let Some(until) = params.until
        && let Ok(dt) = OffsetDateTime::from_unix_timestamp(until)
    {
        query = query.until(dt);
    }

    // Request one extra item to determine if there are more
    let request_limit = params.limit.map(|l| l + 1);
    if let Some(limit) = request_limit {
        query = query.limit(limit);
    }
    if let Some(offset) = params.offset {
        query = query.offset(offset);
    }

    let store = state.store.lock().await;
    let mut fixes = store.query_fixes(&query)?;

    // Check if there are more items
    let has_more = params.limit.is_some_and(|l| fixes.len() > l as usize);
    if has_more {
        fixes.pop(); // Remove the extra item
    }

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: fixes.len(),
            offset: params.offset.unwrap_or(0),
            limit: params.limit,
            has_more,
        },
        data: fixes,
    }))
}

/// A directory entry with its runtime standing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub device_id: String,
    pub alias: Option<String>,
    /// Whether the device has a live state record.
    pub initialized: bool,
}

/// List the device directory.
async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DirectoryEntry>> {
    let devices: Vec<DeviceConfig> = {
        let config = state.config.read().await;
        config.devices.clone()
    };

    let mut entries = Vec::with_capacity(devices.len());
    for device in devices {
        let initialized = state.registry.contains(&device.id).await;
        entries.push(DirectoryEntry {
            device_id: device.id,
            alias: device.alias,
            initialized,
        });
    }
    Json(entries)
}

/// Request to register a device in the directory.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDeviceRequest {
    pub device_id: String,
    #[serde(default)]
    pub alias: Option<String>,
}

/// Register a device in the directory.
///
/// # Lock Acquisition
///
/// Acquires an exclusive write lock on `config` to check for duplicates and
/// add the device.
///
/// # Errors
///
/// - [`AppError::BadRequest`] if the device ID is not a valid topic segment.
/// - [`AppError::Conflict`] if a device with the same ID already exists
///   (case-insensitive).
async fn add_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddDeviceRequest>,
) -> Result<(StatusCode, Json<DirectoryEntry>), AppError> {
    validate_device_id(&request.device_id).map_err(|msg| AppError::BadRequest(msg.to_string()))?;

    {
        let mut config = state.config.write().await;

        // Check if device already exists
        let id_lower = request.device_id.to_lowercase();
        if config.devices.iter().any(|d| d.id.to_lowercase() == id_lower) {
            return Err(AppError::Conflict(format!(
                "Device {} is already registered",
                request.device_id
            )));
        }

        config.devices.push(DeviceConfig {
            id: request.device_id.clone(),
            alias: request.alias.clone(),
        });
    }

    // Persist the directory change
    state.on_devices_changed().await;
    info!(device_id = %request.device_id, "registered device");

    let initialized = state.registry.contains(&request.device_id).await;
    Ok((
        StatusCode::CREATED,
        Json(DirectoryEntry {
            device_id: request.device_id,
            alias: request.alias,
            initialized,
        }),
    ))
}

/// Remove a device from the directory and drop its runtime state.
///
/// Closes the device's telemetry subscriptions and deletes its state record,
/// in memory and in the store. The fix log goes with the state row (cascade),
/// so unregistering a device leaves nothing behind.
async fn remove_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    {
        let mut config = state.config.write().await;

        // Find and remove the device (case-insensitive)
        let id_lower = id.to_lowercase();
        let original_len = config.devices.len();
        config.devices.retain(|d| d.id.to_lowercase() != id_lower);

        if config.devices.len() == original_len {
            return Err(AppError::NotFound(format!(
                "Device {} is not in the directory",
                id
            )));
        }
    }

    // Persist the directory change
    state.on_devices_changed().await;

    state.close_device(&id).await;
    state.registry.remove(&id).await;
    info!(device_id = %id, "removed device");

    Ok(StatusCode::NO_CONTENT)
}

/// API error type.
#[derive(Debug)]
pub enum AppError {
    /// Resource not found (404).
    NotFound(String),
    /// Bad request (400).
    BadRequest(String),
    /// Conflict (409).
    Conflict(String),
    /// Store error (500).
    Store(stroller_store::Error),
    /// Internal error (500).
    Internal(String),
}

impl From<stroller_store::Error> for AppError {
    fn from(e: stroller_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use time::macros::datetime;
    use tower::ServiceExt;

    use stroller_types::{GpsFix, WalkingState};

    use crate::config::Config;
    use crate::state::{BusRequest, OutboundCommand};

    fn create_test_state() -> Arc<AppState> {
        let store = stroller_store::Store::open_in_memory().unwrap();
        let config = Config::default();
        AppState::new(store, config)
    }

    /// Test state with `stroller-17` provisioned in the directory.
    fn create_test_state_with_device() -> Arc<AppState> {
        let store = stroller_store::Store::open_in_memory().unwrap();
        let mut config = Config::default();
        config.devices.push(DeviceConfig {
            id: "stroller-17".to_string(),
            alias: Some("Emma's stroller".to_string()),
        });
        AppState::new(store, config)
    }

    async fn response_body(response: axum::response::Response) -> String {
        let body = response.into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["timestamp"].is_string());
        assert_eq!(json["bus"]["running"], false);
        assert_eq!(json["bus"]["connection"], "disconnected");
    }

    #[tokio::test]
    async fn test_health_reports_bus_state() {
        let state = create_test_state();
        state.bus.set_running(true);
        state.bus.record_message();
        state.bus.record_parse_failure();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["bus"]["running"], true);
        assert_eq!(json["bus"]["messages_received"], 1);
        assert_eq!(json["bus"]["parse_failures"], 1);
        assert!(json["bus"]["started_at"].is_string());
    }

    #[tokio::test]
    async fn test_initialize_creates_device() {
        let state = create_test_state_with_device();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/initialize",
                serde_json::json!({ "deviceId": "stroller-17" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["deviceId"], "stroller-17");
        assert_eq!(json["status"], "All good");
        assert_eq!(json["distanceMeters"], 0.0);

        assert!(state.registry.contains("stroller-17").await);
        assert!(state.connections.is_open("stroller-17").await);
    }

    #[tokio::test]
    async fn test_initialize_existing_returns_ok() {
        let state = create_test_state_with_device();
        let app = router().with_state(Arc::clone(&state));

        state.registry.initialize("stroller-17").await;
        state
            .registry
            .update("stroller-17", |device| device.mode = StrollerMode::Auto)
            .await
            .unwrap();

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/initialize",
                serde_json::json!({ "deviceId": "stroller-17" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        // The existing record came back untouched.
        assert_eq!(json["mode"], "Auto");
    }

    #[tokio::test]
    async fn test_initialize_unknown_device() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/initialize",
                serde_json::json!({ "deviceId": "stroller-99" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert!(json["error"].as_str().unwrap().contains("directory"));
    }

    #[tokio::test]
    async fn test_set_mode() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        state.bus.set_running(true);
        let mut bus_rx = state.bus.take_request_receiver().await.unwrap();
        let mut events = state.broadcaster.subscribe("stroller-17").await;
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/mode",
                serde_json::json!({ "deviceId": "stroller-17", "mode": "AutoStroll" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["mode"], "AutoStroll");

        // The command went out on the bus queue.
        assert_eq!(
            bus_rx.try_recv().unwrap(),
            BusRequest::Publish(OutboundCommand {
                device_id: "stroller-17".to_string(),
                command: DeviceCommand::Mode(StrollerMode::AutoStroll),
            })
        );

        // Subscribed clients got the event.
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::ModeChange {
                mode: StrollerMode::AutoStroll
            }
        );
    }

    #[tokio::test]
    async fn test_set_mode_invalid() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/mode",
                serde_json::json!({ "deviceId": "stroller-17", "mode": "turbo" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Invalid mode");
    }

    #[tokio::test]
    async fn test_set_mode_unknown_device() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/mode",
                serde_json::json!({ "deviceId": "ghost", "mode": "Auto" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_set_speed() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/speed",
                serde_json::json!({ "deviceId": "stroller-17", "speed": 10 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["speed"], 10);

        let snapshot = state.registry.snapshot("stroller-17").await.unwrap();
        assert_eq!(snapshot.speed, Speed::Medium);
    }

    #[tokio::test]
    async fn test_set_speed_invalid_preserves_state() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/speed",
                serde_json::json!({ "deviceId": "stroller-17", "speed": 12 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Invalid speed");

        // The rejected request changed nothing.
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/status?deviceId=stroller-17")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["speed"], 0);
    }

    #[tokio::test]
    async fn test_set_steering() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/steer",
                serde_json::json!({ "deviceId": "stroller-17", "steering": -42.5 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["steering"], -42.5);
    }

    #[tokio::test]
    async fn test_set_steering_invalid() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/steer",
                serde_json::json!({ "deviceId": "stroller-17", "steering": 150.0 }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Invalid steering value");
    }

    #[tokio::test]
    async fn test_set_remote() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/remote",
                serde_json::json!({ "deviceId": "stroller-17", "remote": "ring" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["remote"], "ring");
    }

    #[tokio::test]
    async fn test_set_remote_invalid() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/remote",
                serde_json::json!({ "deviceId": "stroller-17", "remote": "watch" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["error"], "Invalid remote control option");
    }

    #[tokio::test]
    async fn test_reset_distance() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        state.registry.initialize("stroller-23").await;
        for id in ["stroller-17", "stroller-23"] {
            state
                .registry
                .update(id, |device| {
                    device.distance_meters = 420.5;
                    device
                        .gps_history
                        .push(GpsFix::new(52.52, 13.405, datetime!(2024-06-01 10:00 UTC)));
                })
                .await
                .unwrap();
        }

        state.bus.set_running(true);
        let mut bus_rx = state.bus.take_request_receiver().await.unwrap();
        let mut events = state.broadcaster.subscribe("stroller-17").await;
        let mut other_events = state.broadcaster.subscribe("stroller-23").await;
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/distance/reset",
                serde_json::json!({ "deviceId": "stroller-17" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["distanceMeters"], 0.0);
        assert!(json["gpsHistory"].as_array().unwrap().is_empty());

        // Only the targeted device was reset.
        let other = state.registry.snapshot("stroller-23").await.unwrap();
        assert_eq!(other.distance_meters, 420.5);
        assert_eq!(other.gps_history.len(), 1);

        assert_eq!(
            bus_rx.try_recv().unwrap(),
            BusRequest::Publish(OutboundCommand {
                device_id: "stroller-17".to_string(),
                command: DeviceCommand::ResetDistance,
            })
        );
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::ResetDistance { distance: 0.0 }
        );

        // The other device's channel saw nothing.
        assert!(other_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_halt_and_resume_distance() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let mut events = state.broadcaster.subscribe("stroller-17").await;
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/api/distance/halt",
                serde_json::json!({ "deviceId": "stroller-17" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["trackingHalted"], true);
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::HaltDistance { halted: true }
        );

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/distance/resume",
                serde_json::json!({ "deviceId": "stroller-17" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["trackingHalted"], false);
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::ResumeDistance { halted: false }
        );
    }

    #[tokio::test]
    async fn test_get_distance() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        state
            .registry
            .update("stroller-17", |device| device.distance_meters = 1337.25)
            .await
            .unwrap();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/distance?deviceId=stroller-17")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["distance"], 1337.25);
    }

    #[tokio::test]
    async fn test_get_distance_unknown_device() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/distance?deviceId=ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_get_status_returns_full_state() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/status?deviceId=stroller-17")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["deviceId"], "stroller-17");
        assert_eq!(json["mode"], "Manual");
        assert_eq!(json["speed"], 0);
        assert!(json["steering"].is_null());
        assert_eq!(json["remote"], "phone");
        assert_eq!(json["status"], "All good");
        assert_eq!(json["walkingState"], "IDLE");
        assert_eq!(json["walkCount"], 0);
        assert_eq!(json["trackingHalted"], false);
    }

    #[tokio::test]
    async fn test_get_temp_humidity_defaults_null() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/temp_humidity?deviceId=stroller-17")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["temperature"].is_null());
        assert!(json["humidity"].is_null());
    }

    #[tokio::test]
    async fn test_put_temp_humidity() {
        let state = create_test_state();
        state.registry.initialize("stroller-17").await;
        state.bus.set_running(true);
        let mut bus_rx = state.bus.take_request_receiver().await.unwrap();
        let mut events = state.broadcaster.subscribe("stroller-17").await;
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/temp_humidity",
                serde_json::json!({
                    "deviceId": "stroller-17",
                    "temperature": 19.5,
                    "humidity": 52.0
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["temperature"], 19.5);
        assert_eq!(json["humidity"], 52.0);

        // Persisted and broadcast; no command goes out to the stroller.
        let persisted = state
            .store
            .lock()
            .await
            .get_device_state("stroller-17")
            .unwrap()
            .unwrap();
        assert_eq!(persisted.temperature, Some(19.5));

        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::SetTempHumidity {
                temperature: 19.5,
                humidity: 52.0
            }
        );
        assert!(bus_rx.try_recv().is_err());

        // The readings show up on the GET side too.
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/temp_humidity?deviceId=stroller-17")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["temperature"], 19.5);
        assert_eq!(json["humidity"], 52.0);
    }

    #[tokio::test]
    async fn test_get_fixes_empty() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices/stroller-17/fixes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert!(json["data"].as_array().unwrap().is_empty());
        assert_eq!(json["pagination"]["count"], 0);
        assert_eq!(json["pagination"]["has_more"], false);
    }

    async fn seed_fixes(state: &AppState, device_id: &str, count: i64) {
        // Fixes need a state record to attach to.
        state.registry.initialize(device_id).await;
        let store = state.store.lock().await;
        for i in 0..count {
            let fix = GpsFix::new(
                52.52,
                13.405 + i as f64 * 0.001,
                datetime!(2024-06-01 10:00 UTC) + time::Duration::minutes(i),
            );
            store
                .insert_fix(device_id, &fix, 0, WalkingState::Idle)
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_get_fixes_pagination() {
        let state = create_test_state();
        seed_fixes(&state, "stroller-17", 5).await;
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/devices/stroller-17/fixes?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        let data = json["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(json["pagination"]["count"], 2);
        assert_eq!(json["pagination"]["limit"], 2);
        assert_eq!(json["pagination"]["has_more"], true);

        // Newest first.
        assert_eq!(data[0]["longitude"], 13.409);
        assert!(data[0]["capturedAt"].as_str().unwrap().contains('T'));

        // The final page reports no further items.
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices/stroller-17/fixes?limit=2&offset=4")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["pagination"]["count"], 1);
        assert_eq!(json["pagination"]["offset"], 4);
        assert_eq!(json["pagination"]["has_more"], false);
    }

    #[tokio::test]
    async fn test_get_fixes_time_range() {
        let state = create_test_state();
        seed_fixes(&state, "stroller-17", 5).await;
        let app = router().with_state(state);

        let since = datetime!(2024-06-01 10:01 UTC).unix_timestamp();
        let until = datetime!(2024-06-01 10:03 UTC).unix_timestamp();
        let uri = format!(
            "/api/devices/stroller-17/fixes?since={}&until={}",
            since, until
        );

        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["pagination"]["count"], 3);
    }

    #[tokio::test]
    async fn test_get_fixes_scoped_to_device() {
        let state = create_test_state();
        seed_fixes(&state, "stroller-17", 3).await;
        seed_fixes(&state, "stroller-23", 2).await;
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices/stroller-23/fixes")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["pagination"]["count"], 2);
        for fix in json["data"].as_array().unwrap() {
            assert_eq!(fix["deviceId"], "stroller-23");
        }
    }

    #[tokio::test]
    async fn test_get_fixes_invalid_range() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices/stroller-17/fixes?since=100&until=50")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("Invalid time range"));
    }

    #[tokio::test]
    async fn test_list_devices_empty() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_devices_reports_initialized() {
        let state = create_test_state_with_device();
        {
            let mut config = state.config.write().await;
            config.devices.push(DeviceConfig {
                id: "stroller-23".to_string(),
                alias: None,
            });
        }
        state.registry.initialize("stroller-17").await;
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/devices")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        let entries = json.as_array().unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["deviceId"], "stroller-17");
        assert_eq!(entries[0]["alias"], "Emma's stroller");
        assert_eq!(entries[0]["initialized"], true);
        assert_eq!(entries[1]["deviceId"], "stroller-23");
        assert_eq!(entries[1]["initialized"], false);
    }

    #[tokio::test]
    async fn test_add_device() {
        let state = create_test_state();
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/devices",
                serde_json::json!({ "deviceId": "stroller-42", "alias": "Loaner" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(json["deviceId"], "stroller-42");
        assert_eq!(json["alias"], "Loaner");
        assert_eq!(json["initialized"], false);

        let config = state.config.read().await;
        assert!(config.device("stroller-42").is_some());
    }

    #[tokio::test]
    async fn test_add_device_duplicate() {
        let state = create_test_state_with_device();
        let app = router().with_state(state);

        // Same ID, different case.
        let response = app
            .oneshot(json_request(
                "POST",
                "/api/devices",
                serde_json::json!({ "deviceId": "STROLLER-17" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = response_body(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("already registered"));
    }

    #[tokio::test]
    async fn test_add_device_invalid_id() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(json_request(
                "POST",
                "/api/devices",
                serde_json::json!({ "deviceId": "ab" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_remove_device() {
        let state = create_test_state_with_device();
        state.registry.initialize("stroller-17").await;
        state.open_device("stroller-17").await;
        seed_fixes(&state, "stroller-17", 2).await;
        let app = router().with_state(Arc::clone(&state));

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/devices/stroller-17")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Directory entry, subscription, state record, and fix log are all gone.
        assert!(state.config.read().await.device("stroller-17").is_none());
        assert!(!state.connections.is_open("stroller-17").await);
        assert!(!state.registry.contains("stroller-17").await);
        let remaining = state
            .store
            .lock()
            .await
            .count_fixes(Some("stroller-17"))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_remove_device_unknown() {
        let state = create_test_state();
        let app = router().with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/devices/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_fixes_query_default() {
        let query = FixesQuery::default();
        assert!(query.since.is_none());
        assert!(query.until.is_none());
        assert!(query.limit.is_none());
        assert!(query.offset.is_none());
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok",
            version: "0.1.0",
            timestamp: OffsetDateTime::now_utc(),
            bus: BusHealth {
                running: true,
                connection: "connected",
                started_at: None,
                messages_received: 7,
                parse_failures: 0,
            },
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("ok"));
        assert!(json.contains("0.1.0"));
        assert!(json.contains("connected"));
    }

    #[test]
    fn test_app_error_not_found() {
        let error = AppError::NotFound("test".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_app_error_bad_request() {
        let error = AppError::BadRequest("invalid input".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_app_error_conflict() {
        let error = AppError::Conflict("resource exists".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_app_error_internal() {
        let error = AppError::Internal("internal error".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_app_error_debug() {
        let error = AppError::NotFound("test".to_string());
        let debug = format!("{:?}", error);
        assert!(debug.contains("NotFound"));
        assert!(debug.contains("test"));
    }
}
