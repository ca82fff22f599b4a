use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::Arc;
use std::time::Duration;

use chunkmesh_coordinator::{
    Chunker, CoordinatorSettings, GrpcConnector, LifecycleConfig, LoadBalancer,
    NetworkCoordinator, NodeLifecycleManager, StorageMetrics,
};

/// Find a free TCP port by binding to port 0
pub fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind to port 0");
    listener.local_addr().unwrap().port()
}

/// Wait for a TCP port to accept connections
pub async fn wait_for_port(port: u16, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if tokio::time::Instant::now() > deadline {
            panic!("Timed out waiting for port {} to be ready", port);
        }
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{}", port))
            .await
            .is_ok()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Get the path to a compiled binary in the target directory
pub fn cargo_bin(name: &str) -> PathBuf {
    // Look for the binary in target/<profile> (standard cargo test location)
    let mut path = std::env::current_exe()
        .expect("Failed to get current exe")
        .parent()
        .expect("No parent")
        .parent()
        .expect("No grandparent")
        .to_path_buf();
    path.push(name);
    if path.exists() {
        return path;
    }

    // Fallback: try target/debug directly
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.pop(); // integration-tests -> workspace root
    path.push("target");
    path.push("debug");
    path.push(name);
    if path.exists() {
        return path;
    }

    panic!(
        "Binary '{}' not found. Run `cargo build --workspace` first.",
        name
    );
}

/// Lifecycle manager driving the built node binary
pub fn lifecycle_manager() -> NodeLifecycleManager {
    NodeLifecycleManager::new(LifecycleConfig {
        node_binary: cargo_bin("chunkmesh-node"),
        startup_timeout: Duration::from_secs(15),
        stop_timeout: Duration::from_secs(10),
        log_level: "warn".to_string(),
        ..LifecycleConfig::default()
    })
}

/// In-process coordinator talking gRPC to real node processes
pub fn grpc_coordinator() -> NetworkCoordinator {
    NetworkCoordinator::new(
        Chunker::new(),
        LoadBalancer::new(),
        Arc::new(GrpcConnector::default()),
        Arc::new(StorageMetrics::new()),
        CoordinatorSettings {
            transfer_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(2),
        },
    )
}

/// Whether a process with this pid still exists
pub fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// A coordinator binary listening on an ephemeral port
pub struct CoordinatorProcess {
    pub port: u16,
    child: Child,
    exit_status: Option<std::process::ExitStatus>,
}

impl CoordinatorProcess {
    pub async fn start() -> Self {
        Self::spawn(None).await
    }

    pub async fn start_with_config(config: &Path) -> Self {
        Self::spawn(Some(config)).await
    }

    async fn spawn(config: Option<&Path>) -> Self {
        let port = find_free_port();

        let mut command = Command::new(cargo_bin("chunkmesh-coordinator"));
        command
            .args(["--bind", &format!("127.0.0.1:{}", port)])
            .args(["--node-binary", cargo_bin("chunkmesh-node").to_str().unwrap()])
            .args(["--log-level", "debug"])
            .env_remove("CHUNKMESH_CONFIG")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());
        if let Some(path) = config {
            command.args(["--config", path.to_str().unwrap()]);
        }

        let child = command.spawn().expect("Failed to start coordinator");

        wait_for_port(port, Duration::from_secs(30)).await;

        Self {
            port,
            child,
            exit_status: None,
        }
    }

    /// Get the coordinator API URL
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Send SIGTERM and wait for the coordinator to exit
    pub fn terminate(&mut self, timeout: Duration) -> Option<std::process::ExitStatus> {
        if self.exit_status.is_some() {
            return self.exit_status;
        }
        unsafe {
            libc::kill(self.child.id() as libc::pid_t, libc::SIGTERM);
        }
        let deadline = std::time::Instant::now() + timeout;
        while std::time::Instant::now() < deadline {
            if let Ok(Some(status)) = self.child.try_wait() {
                self.exit_status = Some(status);
                return Some(status);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        None
    }
}

impl Drop for CoordinatorProcess {
    fn drop(&mut self) {
        // Graceful first so the coordinator stops the nodes it started
        if self.terminate(Duration::from_secs(15)).is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Response types for deserialization
#[derive(Debug, serde::Deserialize)]
pub struct NodeDescriptor {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, serde::Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<NodeDescriptor>,
}

#[derive(Debug, serde::Deserialize)]
pub struct RunningNodesResponse {
    pub running_nodes: Vec<String>,
    pub count: usize,
}

#[derive(Debug, serde::Deserialize)]
pub struct NetworkStats {
    pub total_nodes: usize,
    pub total_storage_bytes: u64,
    pub used_storage_bytes: u64,
    pub total_chunks: u64,
}

#[derive(Debug, serde::Deserialize)]
pub struct DistributionRecord {
    pub file_name: String,
    pub total_chunks: usize,
    pub total_size_bytes: u64,
    pub node_to_chunk_ids: std::collections::BTreeMap<String, Vec<String>>,
}
