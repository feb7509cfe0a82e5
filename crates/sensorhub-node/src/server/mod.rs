//! Admin HTTP surface
//!
//! Small REST API over the running gateway: device listing, health,
//! manual command submission and pending-command inspection.

pub mod rest;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::AppState;

/// Create the admin router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(rest::health))
        .route("/api/devices", get(rest::list_devices))
        .route("/api/gateway", get(rest::gateway_health))
        .route("/api/command", post(rest::submit_command))
        .route("/api/commands/:id", get(rest::pending_commands))
        .route("/api/events", get(rest::recent_events))
        // CORS for the dashboard
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
