pub mod network;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::types::HealthResponse;
pub use network::AppState;

pub fn create_router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Registry
        .route("/api/network/nodes", get(network::list_nodes))
        .route("/api/network/nodes/register", post(network::register_node))
        .route("/api/network/nodes/:id", delete(network::deregister_node))
        .route("/api/network/status", get(network::network_status))
        // Node processes
        .route("/api/network/nodes/start", post(network::start_node))
        .route("/api/network/nodes/stop/:id", post(network::stop_node))
        .route("/api/network/nodes/running", get(network::running_nodes))
        // Files
        .route("/api/network/files/:name", post(network::distribute_file))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Health check endpoint
async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}
