use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;

/// Point-in-time view of a node's storage usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
    pub chunk_count: u64,
    pub utilization_percent: f64,
}

impl NodeStatus {
    pub fn new(node_id: impl Into<String>, used_bytes: u64, total_bytes: u64, chunk_count: u64) -> Self {
        Self {
            node_id: node_id.into(),
            used_bytes,
            total_bytes,
            chunk_count,
            utilization_percent: utilization_percent(used_bytes, total_bytes),
        }
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// Percentage of `total` taken by `used`. Zero-capacity nodes report 0.
pub fn utilization_percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (used as f64 * 100.0) / total as f64
}

/// Storage state of a single node.
///
/// Every operation runs under one lock, so the capacity check, the simulated
/// transfer delay and the commit of a store can never interleave with another
/// store, retrieve or status call on the same node.
pub struct StorageNode {
    node_id: String,
    total_storage_bytes: u64,
    total_ram_bytes: u64,
    cpu_cores: u32,
    bandwidth_bits_per_second: u64,
    state: Mutex<NodeState>,
}

struct NodeState {
    /// Always equal to the sum of the lengths in `chunks`
    used_storage_bytes: u64,
    chunks: HashMap<String, Vec<u8>>,
}

impl StorageNode {
    pub fn new(config: &NodeConfig) -> Self {
        let node = Self {
            node_id: config.node_id.clone(),
            total_storage_bytes: config.total_storage_bytes(),
            total_ram_bytes: config.total_ram_bytes(),
            cpu_cores: config.cpu_cores,
            bandwidth_bits_per_second: config.bandwidth_bits_per_second(),
            state: Mutex::new(NodeState {
                used_storage_bytes: 0,
                chunks: HashMap::new(),
            }),
        };

        info!(
            "Node created: node_id={}, storage_gb={}, ram_gb={}, cpu_cores={}, bandwidth_mbps={}",
            node.node_id,
            config.storage_gb,
            config.ram_gb,
            node.cpu_cores,
            config.bandwidth_mbps
        );

        node
    }

    /// Node with a byte-precise capacity, for embedding and small-scale runs
    pub fn with_capacity(
        node_id: impl Into<String>,
        total_storage_bytes: u64,
        bandwidth_bits_per_second: u64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            total_storage_bytes,
            total_ram_bytes: 0,
            cpu_cores: 1,
            bandwidth_bits_per_second,
            state: Mutex::new(NodeState {
                used_storage_bytes: 0,
                chunks: HashMap::new(),
            }),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn total_storage_bytes(&self) -> u64 {
        self.total_storage_bytes
    }

    pub fn total_ram_bytes(&self) -> u64 {
        self.total_ram_bytes
    }

    pub fn cpu_cores(&self) -> u32 {
        self.cpu_cores
    }

    pub fn bandwidth_bits_per_second(&self) -> u64 {
        self.bandwidth_bits_per_second
    }

    /// Store a chunk, replacing any previous chunk with the same id.
    ///
    /// Rejects the chunk without side effects when it does not fit. Accepted
    /// chunks are committed only after the simulated transfer delay.
    pub async fn store(&self, chunk_id: &str, data: Vec<u8>) -> Result<(), NodeError> {
        let size = data.len() as u64;
        let mut state = self.state.lock().await;

        let replaced = state
            .chunks
            .get(chunk_id)
            .map(|existing| existing.len() as u64)
            .unwrap_or(0);
        let base = state.used_storage_bytes - replaced;
        let projected = base + size;

        if projected > self.total_storage_bytes {
            let available = self.total_storage_bytes.saturating_sub(base);
            warn!(
                "Insufficient storage for chunk {} (need {} bytes, available {} bytes)",
                chunk_id, size, available
            );
            return Err(NodeError::CapacityExceeded {
                chunk_id: chunk_id.to_string(),
                needed: size,
                available,
            });
        }

        let delay = self.transfer_delay(size);
        debug!("Simulating transfer time for {}: {:?}", chunk_id, delay);
        tokio::time::sleep(delay).await;

        state.chunks.insert(chunk_id.to_string(), data);
        state.used_storage_bytes = projected;

        info!(
            "Stored chunk: {} ({} bytes) - utilization: {:.2}%",
            chunk_id,
            size,
            utilization_percent(state.used_storage_bytes, self.total_storage_bytes)
        );

        Ok(())
    }

    pub async fn retrieve(&self, chunk_id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;

        match state.chunks.get(chunk_id) {
            Some(data) => {
                info!("Retrieved chunk: {} ({} bytes)", chunk_id, data.len());
                Some(data.clone())
            }
            None => {
                warn!("Chunk not found: {}", chunk_id);
                None
            }
        }
    }

    /// Remove a chunk, returning the number of bytes freed
    pub async fn delete(&self, chunk_id: &str) -> Option<u64> {
        let mut state = self.state.lock().await;

        let data = state.chunks.remove(chunk_id)?;
        let freed = data.len() as u64;
        state.used_storage_bytes -= freed;

        info!("Deleted chunk: {} ({} bytes freed)", chunk_id, freed);
        Some(freed)
    }

    pub async fn status(&self) -> NodeStatus {
        let state = self.state.lock().await;

        NodeStatus::new(
            self.node_id.clone(),
            state.used_storage_bytes,
            self.total_storage_bytes,
            state.chunks.len() as u64,
        )
    }

    /// Time needed to push `bytes` through this node's link
    pub fn transfer_delay(&self, bytes: u64) -> Duration {
        if self.bandwidth_bits_per_second == 0 {
            return Duration::ZERO;
        }
        let nanos = (bytes as u128 * 8 * 1_000_000_000) / self.bandwidth_bits_per_second as u128;
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // Fast enough that tests never wait on the simulated link
    const FAST_LINK: u64 = 1_000_000_000_000;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let node = StorageNode::with_capacity("node1", 1024, FAST_LINK);

        node.store("file-chunk-0", vec![7u8; 100]).await.unwrap();

        assert_eq!(node.retrieve("file-chunk-0").await.unwrap(), vec![7u8; 100]);
        assert!(node.retrieve("missing").await.is_none());

        let status = node.status().await;
        assert_eq!(status.node_id, "node1");
        assert_eq!(status.used_bytes, 100);
        assert_eq!(status.total_bytes, 1024);
        assert_eq!(status.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_rejects_store_over_capacity() {
        let node = StorageNode::with_capacity("node1", 1024, FAST_LINK);
        node.store("a", vec![0u8; 600]).await.unwrap();

        let err = node.store("b", vec![0u8; 600]).await.unwrap_err();
        match err {
            NodeError::CapacityExceeded { needed, available, .. } => {
                assert_eq!(needed, 600);
                assert_eq!(available, 424);
            }
            other => panic!("unexpected error: {}", other),
        }

        // Nothing was partially stored
        let status = node.status().await;
        assert_eq!(status.used_bytes, 600);
        assert_eq!(status.chunk_count, 1);
        assert!(node.retrieve("b").await.is_none());
    }

    #[tokio::test]
    async fn test_zero_capacity_node_rejects_everything() {
        let mut config = NodeConfig::new("empty", 50051);
        config.storage_gb = 0;
        let node = StorageNode::new(&config);

        assert!(node.store("chunk", vec![1u8]).await.is_err());

        let status = node.status().await;
        assert_eq!(status.used_bytes, 0);
        assert_eq!(status.total_bytes, 0);
        assert_eq!(status.utilization_percent, 0.0);
    }

    #[tokio::test]
    async fn test_exact_fit_is_accepted() {
        let node = StorageNode::with_capacity("node1", 1000, FAST_LINK);
        node.store("a", vec![0u8; 1000]).await.unwrap();

        let status = node.status().await;
        assert_eq!(status.used_bytes, 1000);
        assert_eq!(status.utilization_percent, 100.0);
    }

    #[tokio::test]
    async fn test_replacing_chunk_accounts_for_delta() {
        let node = StorageNode::with_capacity("node1", 1000, FAST_LINK);
        node.store("a", vec![0u8; 800]).await.unwrap();

        // Would not fit next to the old copy, but replaces it
        node.store("a", vec![1u8; 900]).await.unwrap();

        let status = node.status().await;
        assert_eq!(status.used_bytes, 900);
        assert_eq!(status.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_delete_frees_capacity() {
        let node = StorageNode::with_capacity("node1", 1000, FAST_LINK);
        node.store("a", vec![0u8; 700]).await.unwrap();

        assert_eq!(node.delete("a").await, Some(700));
        assert_eq!(node.delete("a").await, None);

        node.store("b", vec![0u8; 900]).await.unwrap();
        assert_eq!(node.status().await.used_bytes, 900);
    }

    #[tokio::test]
    async fn test_concurrent_stores_cannot_overflow() {
        let node = Arc::new(StorageNode::with_capacity("node1", 1000, 8_000_000));

        let first = {
            let node = node.clone();
            tokio::spawn(async move { node.store("a", vec![0u8; 600]).await })
        };
        let second = {
            let node = node.clone();
            tokio::spawn(async move { node.store("b", vec![0u8; 600]).await })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let accepted = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(accepted, 1);

        let status = node.status().await;
        assert_eq!(status.used_bytes, 600);
        assert!(status.used_bytes <= status.total_bytes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_waits_for_simulated_transfer() {
        // 8 Mbps moves one megabyte per second
        let node = StorageNode::with_capacity("node1", 10_000_000, 8_000_000);

        let start = tokio::time::Instant::now();
        node.store("a", vec![0u8; 500_000]).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[test]
    fn test_transfer_delay() {
        let node = StorageNode::with_capacity("node1", 0, 1_000_000_000);

        assert_eq!(node.transfer_delay(0), Duration::ZERO);
        assert_eq!(node.transfer_delay(125_000_000), Duration::from_secs(1));
        assert_eq!(node.transfer_delay(1_000), Duration::from_micros(8));
    }

    #[test]
    fn test_status_utilization() {
        let status = NodeStatus::new("node1", 256, 1024, 2);
        assert_eq!(status.utilization_percent, 25.0);
        assert_eq!(status.remaining_bytes(), 768);
    }
}
