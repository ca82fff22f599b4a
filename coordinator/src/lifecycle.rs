use chunkmesh_node::proto::node_service_client::NodeServiceClient;
use chunkmesh_node::proto::StatusRequest;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tonic::transport::Endpoint;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};

pub const NODE_BINARY: &str = "chunkmesh-node";

/// Bound on a single readiness query
const READY_QUERY_TIMEOUT: Duration = Duration::from_millis(500);

/// Where the node binary is looked up: next to the running executable, else on `PATH`
pub fn default_node_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(NODE_BINARY)))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(NODE_BINARY))
}

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub node_binary: PathBuf,
    /// Host the spawned nodes bind and are queried on
    pub host: String,
    pub startup_timeout: Duration,
    /// Time between SIGTERM and SIGKILL
    pub stop_timeout: Duration,
    pub log_level: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            node_binary: default_node_binary(),
            host: "127.0.0.1".to_string(),
            startup_timeout: Duration::from_secs(15),
            stop_timeout: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }
}

/// Identity and resource limits of a node process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLaunchSpec {
    pub node_id: String,
    pub port: u16,
    pub storage_gb: u64,
    pub ram_gb: u64,
    pub cpu_cores: u32,
    pub bandwidth_mbps: u64,
}

impl NodeLaunchSpec {
    pub fn new(node_id: impl Into<String>, port: u16, storage_gb: u64, ram_gb: u64) -> Self {
        Self {
            node_id: node_id.into(),
            port,
            storage_gb,
            ram_gb,
            cpu_cores: 4,
            bandwidth_mbps: 1000,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.node_id.trim().is_empty() {
            return Err(Error::Configuration("node id is required".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Configuration(format!(
                "invalid port for node {}: 0",
                self.node_id
            )));
        }
        if self.bandwidth_mbps == 0 {
            return Err(Error::Configuration(format!(
                "bandwidth of node {} must be positive",
                self.node_id
            )));
        }
        Ok(())
    }
}

struct RunningNode {
    child: Child,
    spec: NodeLaunchSpec,
}

/// Starts and stops storage node processes.
///
/// Independent of the coordinator's registry: a running node is not
/// registered until someone registers it.
pub struct NodeLifecycleManager {
    config: LifecycleConfig,
    running: Mutex<HashMap<String, RunningNode>>,
}

impl NodeLifecycleManager {
    pub fn new(config: LifecycleConfig) -> Self {
        info!(
            "Node lifecycle manager using binary {}",
            config.node_binary.display()
        );
        Self {
            config,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Start a node with default CPU and bandwidth limits
    pub async fn start_node(
        &self,
        node_id: &str,
        port: u16,
        storage_gb: u64,
        ram_gb: u64,
    ) -> Result<()> {
        self.start(NodeLaunchSpec::new(node_id, port, storage_gb, ram_gb))
            .await
    }

    /// Spawn a node process and wait until it answers status queries under its own id
    pub async fn start(&self, spec: NodeLaunchSpec) -> Result<()> {
        spec.validate()?;
        let node_id = spec.node_id.clone();

        {
            let mut running = self.running.lock().await;
            prune_exited(&mut running);

            if running.contains_key(&node_id) {
                return Err(Error::AlreadyRunning(node_id));
            }

            info!(
                "Starting node {} on port {} ({} GB storage, {} GB RAM)",
                node_id, spec.port, spec.storage_gb, spec.ram_gb
            );

            let child = self.command(&spec).spawn().map_err(|e| Error::StartFailed {
                node_id: node_id.clone(),
                reason: format!("spawn {}: {}", self.config.node_binary.display(), e),
            })?;

            info!("Node {} spawned with pid {:?}", node_id, child.id());
            running.insert(node_id.clone(), RunningNode { child, spec });
        }

        if let Err(reason) = self.wait_until_ready(&node_id).await {
            error!("Node {} failed to start: {}", node_id, reason);
            let node = self.running.lock().await.remove(&node_id);
            if let Some(mut node) = node {
                if let Err(e) = node.child.kill().await {
                    warn!("Failed to reap node {}: {}", node_id, e);
                }
            }
            return Err(Error::StartFailed { node_id, reason });
        }

        info!("Node {} is serving", node_id);
        Ok(())
    }

    /// Ask a node to terminate, forcing it after the stop timeout
    pub async fn stop_node(&self, node_id: &str) -> Result<()> {
        let node = {
            let mut running = self.running.lock().await;
            prune_exited(&mut running);
            running
                .remove(node_id)
                .ok_or_else(|| Error::NotRunning(node_id.to_string()))?
        };

        let mut child = node.child;
        info!("Stopping node {} (port {})", node_id, node.spec.port);

        if let Err(e) = terminate(&mut child) {
            warn!("Failed to signal node {}: {}", node_id, e);
        }

        match tokio::time::timeout(self.config.stop_timeout, child.wait()).await {
            Ok(Ok(status)) => {
                info!("Node {} stopped ({})", node_id, status);
                Ok(())
            }
            Ok(Err(e)) => Err(Error::StopFailed {
                node_id: node_id.to_string(),
                reason: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    "Node {} did not exit within {:?}, killing it",
                    node_id, self.config.stop_timeout
                );
                child.kill().await.map_err(|e| Error::StopFailed {
                    node_id: node_id.to_string(),
                    reason: e.to_string(),
                })?;
                info!("Node {} killed", node_id);
                Ok(())
            }
        }
    }

    pub async fn is_node_running(&self, node_id: &str) -> bool {
        let mut running = self.running.lock().await;
        prune_exited(&mut running);
        running.contains_key(node_id)
    }

    pub async fn list_running_nodes(&self) -> BTreeSet<String> {
        let mut running = self.running.lock().await;
        prune_exited(&mut running);
        running.keys().cloned().collect()
    }

    /// OS process id of a running node
    pub async fn node_pid(&self, node_id: &str) -> Option<u32> {
        let mut running = self.running.lock().await;
        prune_exited(&mut running);
        running.get(node_id).and_then(|node| node.child.id())
    }

    /// Stop every running node. Failures are logged.
    pub async fn shutdown_all(&self) {
        let ids = self.list_running_nodes().await;
        if ids.is_empty() {
            return;
        }

        info!("Stopping {} node(s)...", ids.len());
        let stops = ids.iter().map(|id| async move {
            if let Err(e) = self.stop_node(id).await {
                warn!("{}", e);
            }
        });
        futures::future::join_all(stops).await;
    }

    fn command(&self, spec: &NodeLaunchSpec) -> Command {
        let mut command = Command::new(&self.config.node_binary);
        command
            .arg("--node-id")
            .arg(&spec.node_id)
            .arg("--port")
            .arg(spec.port.to_string())
            .arg("--host")
            .arg(&self.config.host)
            .arg("--storage-gb")
            .arg(spec.storage_gb.to_string())
            .arg("--ram-gb")
            .arg(spec.ram_gb.to_string())
            .arg("--cpu-cores")
            .arg(spec.cpu_cores.to_string())
            .arg("--bandwidth-mbps")
            .arg(spec.bandwidth_mbps.to_string())
            .arg("--log-level")
            .arg(&self.config.log_level)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    /// Poll until the node answers `GetStatus` with its own id, the child
    /// exits, or the startup timeout passes.
    ///
    /// A bare TCP connect is not enough: another process may already own the
    /// port while the spawned node fails to bind it.
    async fn wait_until_ready(&self, node_id: &str) -> std::result::Result<(), String> {
        let deadline = tokio::time::Instant::now() + self.config.startup_timeout;
        let mut last_error = String::from("no answer");

        loop {
            let port = {
                let mut running = self.running.lock().await;
                let node = running
                    .get_mut(node_id)
                    .ok_or_else(|| "stopped during startup".to_string())?;
                if let Some(status) = exit_status(&mut node.child) {
                    return Err(format!("exited during startup ({})", status));
                }
                node.spec.port
            };

            let addr = format!("{}:{}", self.config.host, port);
            match query_node_id(&addr).await {
                Ok(answered) if answered == node_id => return Ok(()),
                Ok(answered) => {
                    warn!("{} answers as node {}, expected {}", addr, answered, node_id);
                    last_error = format!("{} is served by node {}", addr, answered);
                }
                Err(e) => {
                    debug!("Node {} not ready at {}: {}", node_id, addr, e);
                    last_error = e;
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(format!(
                    "not ready within {:?}: {}",
                    self.config.startup_timeout, last_error
                ));
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Id reported by whatever serves the node protocol at `addr`
async fn query_node_id(addr: &str) -> std::result::Result<String, String> {
    let endpoint = Endpoint::from_shared(format!("http://{}", addr))
        .map_err(|e| format!("invalid address {}: {}", addr, e))?
        .connect_timeout(READY_QUERY_TIMEOUT)
        .timeout(READY_QUERY_TIMEOUT);

    let query = async {
        let channel = endpoint.connect().await.map_err(|e| e.to_string())?;
        let response = NodeServiceClient::new(channel)
            .get_status(StatusRequest {})
            .await
            .map_err(|status| status.message().to_string())?;
        Ok::<_, String>(response.into_inner().node_id)
    };

    tokio::time::timeout(READY_QUERY_TIMEOUT, query)
        .await
        .map_err(|_| format!("{} did not answer within {:?}", addr, READY_QUERY_TIMEOUT))?
}

fn exit_status(child: &mut Child) -> Option<ExitStatus> {
    child.try_wait().ok().flatten()
}

fn prune_exited(running: &mut HashMap<String, RunningNode>) {
    running.retain(|id, node| match node.child.try_wait() {
        Ok(None) => true,
        Ok(Some(status)) => {
            warn!("Node {} exited unexpectedly ({})", id, status);
            false
        }
        Err(e) => {
            warn!("Lost track of node {}: {}", id, e);
            false
        }
    });
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match child.id() {
        Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|e| std::io::Error::from_raw_os_error(e as i32)),
        // Already reaped
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
