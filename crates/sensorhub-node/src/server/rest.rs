//! REST API endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sensorhub_bridge::{BridgeError, CommandAck, CommandRequest, CommandSnapshot, DeviceSnapshot};
use sensorhub_protocol::DeviceId;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

use crate::AppState;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// List all known devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceSnapshot>> {
    Json(state.gateway.devices())
}

/// Gateway health: counters, uptime, queue states
#[derive(Serialize)]
pub struct GatewayHealth {
    pub gateway_id: String,
    pub uptime_seconds: u64,
    pub device_count: usize,
    pub received_ok: u64,
    pub dropped: u64,
    pub duplicates_filtered: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub broker_reconnects: u64,
    pub commands_queued: u64,
    pub commands_sent: u64,
    pub commands_expired: u64,
    pub sidecar_configured: bool,
}

pub async fn gateway_health(State(state): State<Arc<AppState>>) -> Json<GatewayHealth> {
    let stats = state.gateway.stats();
    Json(GatewayHealth {
        gateway_id: state.gateway_id.hex(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        device_count: state.gateway.devices().len(),
        received_ok: stats.received_ok,
        dropped: stats.dropped,
        duplicates_filtered: stats.duplicates_filtered,
        published: stats.published,
        publish_failures: stats.publish_failures,
        broker_reconnects: stats.broker_reconnects,
        commands_queued: stats.commands_queued,
        commands_sent: stats.commands_sent,
        commands_expired: stats.commands_expired,
        sidecar_configured: state.sidecar_configured,
    })
}

/// Submit a command; same validation path as broker ingress
pub async fn submit_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandAck>, (StatusCode, Json<Value>)> {
    match state.gateway.submit_command(&request).await {
        Ok(ack) => Ok(Json(ack)),
        Err(e) => {
            let status = match &e {
                BridgeError::CommandQueueFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
                BridgeError::InvalidCommand(_)
                | BridgeError::UnknownAction(_)
                | BridgeError::ValueOutOfRange { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((
                status,
                Json(serde_json::json!({
                    "success": false,
                    "error": e.to_string(),
                    "code": e.error_code(),
                })),
            ))
        }
    }
}

/// Pending commands for one device
pub async fn pending_commands(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<CommandSnapshot>>, (StatusCode, Json<Value>)> {
    let device = DeviceId::from_str(&id).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"success": false, "error": "bad device id"})),
        )
    })?;
    Ok(Json(state.gateway.pending_commands(device)))
}

/// Recent events
///
/// Events are stored by the persistence sidecar; the gateway itself keeps
/// none, so this is empty unless the dashboard queries the sidecar's own
/// API directly.
pub async fn recent_events() -> Json<Vec<Value>> {
    Json(Vec::new())
}
