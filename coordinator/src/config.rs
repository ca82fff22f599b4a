use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunker::BYTES_PER_MB;
use crate::coordinator::CoordinatorSettings;
use crate::lifecycle::{default_node_binary, LifecycleConfig, NodeLaunchSpec};

/// Coordinator configuration, read from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub bind: String,
    /// Node binary for started nodes; looked up next to the coordinator when unset
    pub node_binary: Option<PathBuf>,
    pub node_host: String,
    pub node_log_level: String,
    pub default_chunk_size_mb: u32,
    pub transfer_timeout_secs: u64,
    pub status_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub node_startup_timeout_secs: u64,
    pub node_stop_timeout_secs: u64,
    pub max_upload_mb: u64,
    pub nodes: Vec<NodeEntry>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            node_binary: None,
            node_host: "127.0.0.1".to_string(),
            node_log_level: "info".to_string(),
            default_chunk_size_mb: 64,
            transfer_timeout_secs: 120,
            status_timeout_secs: 5,
            shutdown_grace_secs: 5,
            node_startup_timeout_secs: 15,
            node_stop_timeout_secs: 10,
            max_upload_mb: 1024,
            nodes: Vec::new(),
        }
    }
}

/// A node registered at boot, optionally started first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub node_id: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// Spawn the node process before registering it
    #[serde(default)]
    pub start: bool,
    #[serde(default = "default_storage_gb")]
    pub storage_gb: u64,
    #[serde(default = "default_ram_gb")]
    pub ram_gb: u64,
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: u32,
    #[serde(default = "default_bandwidth_mbps")]
    pub bandwidth_mbps: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_storage_gb() -> u64 {
    100
}

fn default_ram_gb() -> u64 {
    8
}

fn default_cpu_cores() -> u32 {
    4
}

fn default_bandwidth_mbps() -> u64 {
    1000
}

impl NodeEntry {
    pub fn launch_spec(&self) -> NodeLaunchSpec {
        NodeLaunchSpec {
            node_id: self.node_id.clone(),
            port: self.port,
            storage_gb: self.storage_gb,
            ram_gb: self.ram_gb,
            cpu_cores: self.cpu_cores,
            bandwidth_mbps: self.bandwidth_mbps,
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let cfg: Self =
            toml::from_str(&text).with_context(|| format!("Failed to parse {:?}", path))?;
        cfg.validate()
            .with_context(|| format!("Invalid config {:?}", path))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_chunk_size_mb == 0 {
            bail!("default_chunk_size_mb must be positive");
        }
        if self.transfer_timeout_secs == 0 || self.status_timeout_secs == 0 {
            bail!("timeouts must be positive");
        }
        if self.max_upload_mb == 0 {
            bail!("max_upload_mb must be positive");
        }

        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if node.node_id.trim().is_empty() {
                bail!("node entry without node_id");
            }
            if node.port == 0 {
                bail!("node {} has port 0", node.node_id);
            }
            if !seen.insert(node.node_id.as_str()) {
                bail!("node {} is listed twice", node.node_id);
            }
        }
        Ok(())
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            transfer_timeout: Duration::from_secs(self.transfer_timeout_secs),
            status_timeout: Duration::from_secs(self.status_timeout_secs),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            node_binary: self.node_binary.clone().unwrap_or_else(default_node_binary),
            host: self.node_host.clone(),
            startup_timeout: Duration::from_secs(self.node_startup_timeout_secs),
            stop_timeout: Duration::from_secs(self.node_stop_timeout_secs),
            log_level: self.node_log_level.clone(),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        usize::try_from(self.max_upload_mb.saturating_mul(BYTES_PER_MB as u64)).unwrap_or(usize::MAX)
    }
}
