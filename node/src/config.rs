use std::time::Duration;

use crate::error::NodeError;

/// Storage is configured in GiB.
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Bandwidth is configured in decimal megabits.
pub const BITS_PER_MEGABIT: u64 = 1_000_000;

/// Identity and resource limits of a single storage node.
///
/// Limits are fixed for the lifetime of the node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub storage_gb: u64,
    pub ram_gb: u64,
    pub cpu_cores: u32,
    pub bandwidth_mbps: u64,
    /// How long in-flight calls may run after shutdown is requested
    pub shutdown_grace: Duration,
}

impl NodeConfig {
    pub fn new(node_id: impl Into<String>, port: u16) -> Self {
        Self {
            node_id: node_id.into(),
            host: "127.0.0.1".to_string(),
            port,
            storage_gb: 100,
            ram_gb: 8,
            cpu_cores: 4,
            bandwidth_mbps: 1000,
            shutdown_grace: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> Result<(), NodeError> {
        if self.node_id.trim().is_empty() {
            return Err(NodeError::InvalidConfig("node id is required".to_string()));
        }
        if self.port == 0 {
            return Err(NodeError::InvalidConfig(format!(
                "invalid port number: {}",
                self.port
            )));
        }
        if self.bandwidth_mbps == 0 {
            return Err(NodeError::InvalidConfig(
                "bandwidth must be at least 1 Mbps".to_string(),
            ));
        }
        Ok(())
    }

    pub fn total_storage_bytes(&self) -> u64 {
        self.storage_gb.saturating_mul(BYTES_PER_GB)
    }

    pub fn total_ram_bytes(&self) -> u64 {
        self.ram_gb.saturating_mul(BYTES_PER_GB)
    }

    pub fn bandwidth_bits_per_second(&self) -> u64 {
        self.bandwidth_mbps.saturating_mul(BITS_PER_MEGABIT)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
