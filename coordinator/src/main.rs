use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use chunkmesh_coordinator::api::{self, AppState};
use chunkmesh_coordinator::{
    Chunker, CoordinatorConfig, GrpcConnector, LoadBalancer, NetworkCoordinator,
    NodeLifecycleManager, StorageMetrics,
};
use chunkmesh_node::shutdown_signal;

#[derive(Parser, Debug)]
#[command(name = "chunkmesh-coordinator")]
#[command(about = "chunkmesh network coordinator", long_about = None)]
struct Args {
    /// TOML config file
    #[arg(long, env = "CHUNKMESH_CONFIG")]
    config: Option<PathBuf>,

    /// Bind address for HTTP server (overrides the config file)
    #[arg(long, env = "CHUNKMESH_BIND")]
    bind: Option<String>,

    /// Storage node binary used for started nodes
    #[arg(long, env = "CHUNKMESH_NODE_BINARY")]
    node_binary: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting chunkmesh coordinator");

    let mut config = match &args.config {
        Some(path) => CoordinatorConfig::load(path)?,
        None => CoordinatorConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(node_binary) = args.node_binary {
        config.node_binary = Some(node_binary);
    }
    config.validate().context("Invalid configuration")?;

    let coordinator = Arc::new(NetworkCoordinator::new(
        Chunker::new(),
        LoadBalancer::new(),
        Arc::new(GrpcConnector::default()),
        Arc::new(StorageMetrics::new()),
        config.coordinator_settings(),
    ));
    let lifecycle = Arc::new(NodeLifecycleManager::new(config.lifecycle_config()));

    // Boot-time nodes; a node that fails to come up is logged and skipped
    for entry in &config.nodes {
        if entry.start {
            if let Err(e) = lifecycle.start(entry.launch_spec()).await {
                error!("Failed to start node {}: {}", entry.node_id, e);
                continue;
            }
        }
        if let Err(e) = coordinator
            .register_node(&entry.node_id, &entry.host, entry.port)
            .await
        {
            error!("Failed to register node {}: {}", entry.node_id, e);
        }
    }

    let state = Arc::new(AppState {
        coordinator: coordinator.clone(),
        lifecycle: lifecycle.clone(),
        default_chunk_size_mb: config.default_chunk_size_mb,
    });
    let app = api::create_router(state, config.max_upload_bytes());

    // Parse bind address
    let addr: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind))?;
    info!("Listening on http://{}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Shutdown signal received");
        })
        .await?;

    coordinator.shutdown().await;
    lifecycle.shutdown_all().await;

    info!("Coordinator stopped");
    Ok(())
}
