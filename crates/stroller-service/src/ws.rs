//! WebSocket handler for real-time device updates.
//!
//! Clients subscribe to exactly one device: `/api/ws?deviceId={id}`. The
//! service sends an `initial` snapshot first, then forwards that device's
//! state events as JSON text frames. Client frames parse as [`WsRequest`]
//! polls; replies are published on the device's channel so every
//! subscriber sees the same refreshed values.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stroller_types::{StateEvent, WsRequest};

use crate::state::AppState;

/// Create the WebSocket router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/ws", get(ws_handler))
}

/// Query parameters of the upgrade request. The `token` parameter is
/// consumed by the auth middleware before the request gets here.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsQuery {
    device_id: String,
}

/// WebSocket upgrade handler.
///
/// Rejects unknown devices before the upgrade so clients get a proper
/// HTTP status instead of an immediately-closed socket.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if !state.registry.contains(&query.device_id).await {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("Unknown device: {}", query.device_id)
            })),
        )
            .into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, query.device_id))
}

/// Handle a WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, device_id: String) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Subscribe to the device's channel FIRST (before sending the snapshot)
    // so events published while the snapshot is in flight are not missed
    let mut rx = state.broadcaster.subscribe(&device_id).await;

    info!(conn_id = %conn_id, device_id, "WebSocket client connected");

    // Send the full state snapshot before any live events
    let Some(snapshot) = state.registry.snapshot(&device_id).await else {
        info!(device_id, "device state removed before snapshot, closing");
        return;
    };

    if let Ok(json) = serde_json::to_string(&StateEvent::Initial(snapshot))
        && sender.send(Message::Text(json.into())).await.is_err()
    {
        info!(conn_id = %conn_id, "WebSocket client disconnected during initial snapshot");
        return;
    }

    debug!(conn_id = %conn_id, "Sent initial snapshot to WebSocket client");

    // Spawn a task to forward state events to the client
    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(conn_id = %conn_id, "WebSocket client lagged, skipped {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    warn!("Failed to serialize event: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Spawn a task to serve client poll requests
    let poll_state = Arc::clone(&state);
    let poll_device = device_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    let request: WsRequest = match serde_json::from_str(&text) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!(conn_id = %conn_id, "Ignoring unparseable client frame: {}", e);
                            continue;
                        }
                    };
                    answer_request(&poll_state, &poll_device, request).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by axum
                    debug!(conn_id = %conn_id, "Received ping");
                }
                Ok(_) => {
                    // Ignore other messages
                }
                Err(e) => {
                    warn!(conn_id = %conn_id, "WebSocket receive error: {}", e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other
    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        },
        _ = &mut recv_task => {
            send_task.abort();
        },
    }

    // Both pumps are down; their receiver handles are gone, so the channel
    // entry can be dropped if no other client holds one.
    let _ = send_task.await;
    let _ = recv_task.await;
    state.broadcaster.release_if_idle(&device_id).await;

    info!(conn_id = %conn_id, device_id, "WebSocket client disconnected");
}

/// Answer a client poll by publishing the reply on the device's channel.
async fn answer_request(state: &Arc<AppState>, device_id: &str, request: WsRequest) {
    let Some(snapshot) = state.registry.snapshot(device_id).await else {
        warn!(device_id, "poll for a device with no state record");
        return;
    };

    let event = match request {
        WsRequest::GetDistance => StateEvent::GetDistance {
            distance: snapshot.distance_meters,
        },
        WsRequest::GetTempHumidity => StateEvent::GetTempHumidity {
            temperature: snapshot.temperature,
            humidity: snapshot.humidity,
        },
        WsRequest::GetStatus => StateEvent::GetStatus(snapshot),
    };

    state.broadcaster.publish(device_id, event).await;
}
