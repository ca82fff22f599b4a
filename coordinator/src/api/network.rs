use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::{
    coordinator::{DistributionRecord, NetworkCoordinator},
    error::Error,
    lifecycle::{NodeLaunchSpec, NodeLifecycleManager},
    metrics::NetworkStats,
    types::{
        DistributeQuery, ListNodesResponse, NodeActionResponse, RegisterNodeRequest,
        RunningNodesResponse, StartNodeRequest,
    },
};

pub struct AppState {
    pub coordinator: Arc<NetworkCoordinator>,
    pub lifecycle: Arc<NodeLifecycleManager>,
    pub default_chunk_size_mb: u32,
}

/// HTTP status for a coordinator error
pub fn status_code(err: &Error) -> StatusCode {
    match err {
        Error::Configuration(_) => StatusCode::BAD_REQUEST,
        Error::DuplicateNode(_) | Error::AlreadyRunning(_) => StatusCode::CONFLICT,
        Error::UnknownNode(_) | Error::NotRunning(_) => StatusCode::NOT_FOUND,
        Error::NoAvailableNodes => StatusCode::SERVICE_UNAVAILABLE,
        Error::ChunkTransferFailed { .. }
        | Error::Node { .. }
        | Error::ChunkNotFound { .. }
        | Error::ChecksumMismatch(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: Error) -> (StatusCode, String) {
    let code = status_code(&err);
    if code.is_server_error() {
        error!("{}", err);
    }
    (code, err.to_string())
}

/// GET /api/network/nodes - List registered nodes
pub async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<ListNodesResponse> {
    Json(ListNodesResponse {
        nodes: state.coordinator.registered_nodes().await,
    })
}

/// POST /api/network/nodes/register - Register a running node
pub async fn register_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<NodeActionResponse>, (StatusCode, String)> {
    info!(
        "API request: register node_id={}, host={}, port={}",
        req.node_id, req.host, req.port
    );

    state
        .coordinator
        .register_node(&req.node_id, &req.host, req.port)
        .await
        .map_err(reject)?;

    Ok(Json(NodeActionResponse::ok(
        req.node_id,
        "Node registered successfully",
    )))
}

/// DELETE /api/network/nodes/:id - Deregister a node
pub async fn deregister_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeActionResponse>, (StatusCode, String)> {
    state
        .coordinator
        .deregister_node(&node_id)
        .await
        .map_err(reject)?;

    Ok(Json(NodeActionResponse::ok(
        node_id,
        "Node deregistered successfully",
    )))
}

/// GET /api/network/status - Aggregate storage usage
pub async fn network_status(State(state): State<Arc<AppState>>) -> Json<NetworkStats> {
    Json(state.coordinator.network_stats().await)
}

/// POST /api/network/nodes/start - Start a node process
pub async fn start_node(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartNodeRequest>,
) -> Result<Json<NodeActionResponse>, (StatusCode, String)> {
    info!(
        "API request: start node_id={}, port={}, storage_gb={}, ram_gb={}",
        req.node_id, req.port, req.storage_gb, req.ram_gb
    );

    let mut spec = NodeLaunchSpec::new(req.node_id.clone(), req.port, req.storage_gb, req.ram_gb);
    if let Some(cpu_cores) = req.cpu_cores {
        spec.cpu_cores = cpu_cores;
    }
    if let Some(bandwidth_mbps) = req.bandwidth_mbps {
        spec.bandwidth_mbps = bandwidth_mbps;
    }

    state.lifecycle.start(spec).await.map_err(reject)?;

    Ok(Json(NodeActionResponse::ok(
        req.node_id,
        "Node started successfully",
    )))
}

/// POST /api/network/nodes/stop/:id - Stop a node process
pub async fn stop_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeActionResponse>, (StatusCode, String)> {
    info!("API request: stop node_id={}", node_id);

    state.lifecycle.stop_node(&node_id).await.map_err(reject)?;

    Ok(Json(NodeActionResponse::ok(
        node_id,
        "Node stopped successfully",
    )))
}

/// GET /api/network/nodes/running - List running node processes
pub async fn running_nodes(State(state): State<Arc<AppState>>) -> Json<RunningNodesResponse> {
    let running_nodes: Vec<String> = state
        .lifecycle
        .list_running_nodes()
        .await
        .into_iter()
        .collect();

    Json(RunningNodesResponse {
        count: running_nodes.len(),
        running_nodes,
    })
}

/// POST /api/network/files/:name - Distribute the request body across the network
pub async fn distribute_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<DistributeQuery>,
    body: Bytes,
) -> Result<Json<DistributionRecord>, (StatusCode, String)> {
    let chunk_size_mb = query.chunk_size_mb.unwrap_or(state.default_chunk_size_mb);
    info!(
        "API request: distribute {} ({} bytes, {} MB chunks)",
        name,
        body.len(),
        chunk_size_mb
    );

    let record = state
        .coordinator
        .distribute_file(&name, &body[..], chunk_size_mb)
        .await
        .map_err(reject)?;

    Ok(Json(record))
}
