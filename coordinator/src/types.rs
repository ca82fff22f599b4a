use serde::{Deserialize, Serialize};

use crate::coordinator::NodeDescriptor;

// ============================================================================
// Registry Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<NodeDescriptor>,
}

/// Result of a register, deregister, start or stop call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeActionResponse {
    pub success: bool,
    pub message: String,
    pub node_id: String,
}

impl NodeActionResponse {
    pub fn ok(node_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            node_id: node_id.into(),
        }
    }
}

// ============================================================================
// Lifecycle Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartNodeRequest {
    pub node_id: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_storage_gb")]
    pub storage_gb: u64,
    #[serde(default = "default_ram_gb")]
    pub ram_gb: u64,
    pub cpu_cores: Option<u32>,
    pub bandwidth_mbps: Option<u64>,
}

fn default_port() -> u16 {
    50051
}

fn default_storage_gb() -> u64 {
    100
}

fn default_ram_gb() -> u64 {
    8
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningNodesResponse {
    pub running_nodes: Vec<String>,
    pub count: usize,
}

// ============================================================================
// File Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DistributeQuery {
    pub chunk_size_mb: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}
