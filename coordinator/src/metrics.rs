use chunkmesh_node::storage::utilization_percent;
use chunkmesh_node::NodeStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Network-wide storage usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub total_nodes: usize,
    /// Nodes that contributed a snapshot
    pub reporting_nodes: usize,
    pub total_storage_bytes: u64,
    pub used_storage_bytes: u64,
    pub utilization_percent: f64,
    pub total_chunks: u64,
    pub nodes: Vec<NodeStatus>,
}

/// Latest status snapshot per node. A new snapshot replaces the old one.
pub struct StorageMetrics {
    statuses: RwLock<BTreeMap<String, NodeStatus>>,
}

impl StorageMetrics {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn update_node_status(&self, status: NodeStatus) {
        debug!(
            "Status of {}: {}/{} bytes, {} chunk(s)",
            status.node_id, status.used_bytes, status.total_bytes, status.chunk_count
        );
        let mut statuses = self.statuses.write().await;
        statuses.insert(status.node_id.clone(), status);
    }

    pub async fn forget(&self, node_id: &str) {
        let mut statuses = self.statuses.write().await;
        statuses.remove(node_id);
    }

    pub async fn clear(&self) {
        let mut statuses = self.statuses.write().await;
        statuses.clear();
    }

    pub async fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        let statuses = self.statuses.read().await;
        statuses.get(node_id).cloned()
    }

    pub async fn snapshot(&self) -> BTreeMap<String, NodeStatus> {
        let statuses = self.statuses.read().await;
        statuses.clone()
    }

    /// Aggregate the snapshots of `registered` nodes
    pub async fn network_metrics(&self, registered: &[String]) -> NetworkStats {
        let statuses = self.statuses.read().await;

        let nodes: Vec<NodeStatus> = registered
            .iter()
            .filter_map(|id| statuses.get(id).cloned())
            .collect();

        let total_storage_bytes: u64 = nodes.iter().map(|s| s.total_bytes).sum();
        let used_storage_bytes: u64 = nodes.iter().map(|s| s.used_bytes).sum();
        let total_chunks: u64 = nodes.iter().map(|s| s.chunk_count).sum();

        NetworkStats {
            total_nodes: registered.len(),
            reporting_nodes: nodes.len(),
            total_storage_bytes,
            used_storage_bytes,
            utilization_percent: utilization_percent(used_storage_bytes, total_storage_bytes),
            total_chunks,
            nodes,
        }
    }
}

impl Default for StorageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_aggregate_over_registered_nodes() {
        let metrics = StorageMetrics::new();
        metrics.update_node_status(NodeStatus::new("a", 100, 1000, 2)).await;
        metrics.update_node_status(NodeStatus::new("b", 300, 1000, 1)).await;
        metrics.update_node_status(NodeStatus::new("gone", 999, 1000, 9)).await;

        let stats = metrics
            .network_metrics(&["a".to_string(), "b".to_string(), "silent".to_string()])
            .await;

        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.reporting_nodes, 2);
        assert_eq!(stats.total_storage_bytes, 2000);
        assert_eq!(stats.used_storage_bytes, 400);
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.utilization_percent, 20.0);
    }

    #[tokio::test]
    async fn test_new_snapshot_supersedes_old() {
        let metrics = StorageMetrics::new();
        metrics.update_node_status(NodeStatus::new("a", 100, 1000, 2)).await;
        metrics.update_node_status(NodeStatus::new("a", 50, 1000, 1)).await;

        let status = metrics.node_status("a").await.unwrap();
        assert_eq!(status.used_bytes, 50);
        assert_eq!(status.chunk_count, 1);

        metrics.forget("a").await;
        assert!(metrics.node_status("a").await.is_none());
    }

    #[tokio::test]
    async fn test_empty_network() {
        let stats = StorageMetrics::new().network_metrics(&[]).await;
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.utilization_percent, 0.0);
    }
}
