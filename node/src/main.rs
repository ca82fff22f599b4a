use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use chunkmesh_node::{shutdown_signal, NodeConfig, NodeServer};

#[derive(Parser, Debug)]
#[command(name = "chunkmesh-node")]
#[command(about = "chunkmesh storage node", long_about = None)]
struct Args {
    /// Unique node identifier
    #[arg(long)]
    node_id: String,

    /// gRPC listen port
    #[arg(long)]
    port: u16,

    /// gRPC listen host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Storage capacity in GB
    #[arg(long, default_value_t = 100)]
    storage_gb: u64,

    /// RAM in GB
    #[arg(long, default_value_t = 8)]
    ram_gb: u64,

    /// CPU cores
    #[arg(long, default_value_t = 4)]
    cpu_cores: u32,

    /// Link bandwidth in Mbps
    #[arg(long, default_value_t = 1000)]
    bandwidth_mbps: u64,

    /// Seconds in-flight calls may take to finish on shutdown
    #[arg(long, default_value_t = 30)]
    shutdown_grace_secs: u64,

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

    info!("Starting chunkmesh storage node {}", args.node_id);

    let config = NodeConfig {
        node_id: args.node_id,
        host: args.host,
        port: args.port,
        storage_gb: args.storage_gb,
        ram_gb: args.ram_gb,
        cpu_cores: args.cpu_cores,
        bandwidth_mbps: args.bandwidth_mbps,
        shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
    };

    let server = NodeServer::new(config).context("Invalid node configuration")?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        trigger.cancel();
    });

    server.serve(shutdown).await.context("Storage node failed")?;

    Ok(())
}
