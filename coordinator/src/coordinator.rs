use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use chunkmesh_node::NodeStatus;

use crate::chunker::{base_name, checksum, chunk_id, ChunkSize, Chunker};
use crate::client::{NodeClient, NodeConnector, StoreOutcome};
use crate::error::{Error, Result, TransferError};
use crate::metrics::{NetworkStats, StorageMetrics};
use crate::selector::LoadBalancer;

/// Address of a registered node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

struct RegisteredNode {
    descriptor: NodeDescriptor,
    client: Arc<dyn NodeClient>,
}

/// Where the chunks of one file were placed.
///
/// This is the only record of the placement; callers keep it if they want to
/// read the file back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRecord {
    pub distribution_id: Uuid,
    pub file_name: String,
    pub total_chunks: usize,
    pub total_size_bytes: u64,
    /// Node id -> chunk ids in placement order
    pub node_to_chunk_ids: BTreeMap<String, Vec<String>>,
    /// Chunk id -> hex SHA-256
    pub chunk_checksums: BTreeMap<String, String>,
    pub distribution_time_ms: u64,
    /// Unix seconds
    pub created_at: i64,
}

impl DistributionRecord {
    pub fn new(file_name: impl Into<String>, total_chunks: usize, total_size_bytes: u64) -> Self {
        Self {
            distribution_id: Uuid::new_v4(),
            file_name: file_name.into(),
            total_chunks,
            total_size_bytes,
            node_to_chunk_ids: BTreeMap::new(),
            chunk_checksums: BTreeMap::new(),
            distribution_time_ms: 0,
            created_at: time::OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    pub fn add_chunk_to_node(&mut self, node_id: &str, chunk_id: String, checksum: String) {
        self.chunk_checksums.insert(chunk_id.clone(), checksum);
        self.node_to_chunk_ids
            .entry(node_id.to_string())
            .or_default()
            .push(chunk_id);
    }

    pub fn placed_chunks(&self) -> usize {
        self.node_to_chunk_ids.values().map(Vec::len).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.placed_chunks() == self.total_chunks
    }

    pub fn node_for_chunk(&self, chunk_id: &str) -> Option<&str> {
        self.node_to_chunk_ids
            .iter()
            .find(|(_, ids)| ids.iter().any(|id| id == chunk_id))
            .map(|(node, _)| node.as_str())
    }

    /// All chunk ids of the file in index order
    pub fn chunk_ids(&self) -> Vec<String> {
        (0..self.total_chunks)
            .map(|i| chunk_id(&self.file_name, i))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Upper bound for one chunk transfer, including the node's simulated delay
    pub transfer_timeout: Duration,
    pub status_timeout: Duration,
    /// How long a connection may take to close on shutdown or deregistration
    pub shutdown_grace: Duration,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            transfer_timeout: Duration::from_secs(120),
            status_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Owns the node registry and places files across it.
///
/// Chunks of one distribution are transferred strictly one after another.
/// Separate distributions may run concurrently against the same registry.
pub struct NetworkCoordinator {
    registry: RwLock<BTreeMap<String, RegisteredNode>>,
    chunker: Chunker,
    selector: LoadBalancer,
    connector: Arc<dyn NodeConnector>,
    metrics: Arc<StorageMetrics>,
    settings: CoordinatorSettings,
}

impl NetworkCoordinator {
    pub fn new(
        chunker: Chunker,
        selector: LoadBalancer,
        connector: Arc<dyn NodeConnector>,
        metrics: Arc<StorageMetrics>,
        settings: CoordinatorSettings,
    ) -> Self {
        info!("Network coordinator initialized");
        Self {
            registry: RwLock::new(BTreeMap::new()),
            chunker,
            selector,
            connector,
            metrics,
            settings,
        }
    }

    pub fn metrics(&self) -> Arc<StorageMetrics> {
        self.metrics.clone()
    }

    /// Open a connection to a node and add it to the registry
    pub async fn register_node(&self, node_id: &str, host: &str, port: u16) -> Result<()> {
        if node_id.trim().is_empty() {
            return Err(Error::Configuration("node id is required".to_string()));
        }

        {
            let mut registry = self.registry.write().await;
            if registry.contains_key(node_id) {
                return Err(Error::DuplicateNode(node_id.to_string()));
            }

            info!("Registering node: {} at {}:{}", node_id, host, port);
            let client = self.connector.connect(node_id, host, port).await?;

            registry.insert(
                node_id.to_string(),
                RegisteredNode {
                    descriptor: NodeDescriptor {
                        node_id: node_id.to_string(),
                        host: host.to_string(),
                        port,
                    },
                    client,
                },
            );
        }

        info!("Node registered: {}", node_id);

        // Initial snapshot so metrics include the node right away
        self.refresh_node(node_id).await;

        Ok(())
    }

    /// Remove a node from the registry and close its connection
    pub async fn deregister_node(&self, node_id: &str) -> Result<()> {
        let node = {
            let mut registry = self.registry.write().await;
            registry
                .remove(node_id)
                .ok_or_else(|| Error::UnknownNode(node_id.to_string()))?
        };

        self.metrics.forget(node_id).await;
        self.close_connection(node_id, node.client).await;

        info!("Node deregistered: {}", node_id);
        Ok(())
    }

    /// Registered nodes in id order
    pub async fn registered_nodes(&self) -> Vec<NodeDescriptor> {
        let registry = self.registry.read().await;
        registry.values().map(|n| n.descriptor.clone()).collect()
    }

    /// Split `source` into `chunk_size_mb` chunks and place each one on a node
    pub async fn distribute_file<R>(
        &self,
        file_name: &str,
        source: R,
        chunk_size_mb: u32,
    ) -> Result<DistributionRecord>
    where
        R: AsyncRead + Unpin,
    {
        let chunk_size = ChunkSize::from_mb(chunk_size_mb)?;
        self.distribute(file_name, source, chunk_size, &CancellationToken::new())
            .await
    }

    /// Place every chunk of `source`, one chunk at a time.
    ///
    /// The first rejected, failed or timed-out transfer aborts the whole
    /// distribution. Chunks already placed are left on their nodes and are
    /// reported in the error. Cancelling `cancel` stops further transfers the
    /// same way.
    ///
    /// A chunk whose transfer timed out or was cancelled is not in the partial
    /// record, yet the node may still commit it. The coordinator sends a
    /// best-effort delete for it in the background; should that delete reach
    /// the node before the store does, the chunk stays there under the
    /// `chunk_id` and `node_id` carried by the error.
    pub async fn distribute<R>(
        &self,
        file_name: &str,
        source: R,
        chunk_size: ChunkSize,
        cancel: &CancellationToken,
    ) -> Result<DistributionRecord>
    where
        R: AsyncRead + Unpin,
    {
        {
            let registry = self.registry.read().await;
            if registry.is_empty() {
                return Err(Error::NoAvailableNodes);
            }
        }

        let chunks = self.chunker.decompose(file_name, source, chunk_size).await?;
        let total_chunks = chunks.len();
        let total_size: u64 = chunks.iter().map(|c| c.size()).sum();
        let mut record = DistributionRecord::new(base_name(file_name), total_chunks, total_size);

        info!(
            "Starting file distribution: {} ({} bytes, {} chunk(s), id={})",
            record.file_name, total_size, total_chunks, record.distribution_id
        );

        let started = Instant::now();

        for chunk in chunks {
            if cancel.is_cancelled() {
                warn!("Distribution of {} cancelled", record.file_name);
                record.distribution_time_ms = started.elapsed().as_millis() as u64;
                return Err(Error::Cancelled {
                    partial: Box::new(record),
                });
            }

            // Re-evaluated for every chunk so fresh snapshots steer later chunks
            let (node_id, client) = self.select_target(chunk.size()).await?;

            let chunk_id = chunk.id().to_string();
            let chunk_checksum = chunk.checksum().to_string();
            info!(
                "Chunk {}/{}: {} -> {}",
                chunk.index() + 1,
                total_chunks,
                chunk_id,
                node_id
            );

            let transfer_started = Instant::now();
            let transfer = tokio::time::timeout(
                self.settings.transfer_timeout,
                client.store_chunk(chunk),
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("Distribution of {} cancelled during transfer of {}", record.file_name, chunk_id);
                    self.withdraw_chunk(&node_id, client.clone(), &chunk_id);
                    record.distribution_time_ms = started.elapsed().as_millis() as u64;
                    return Err(Error::Cancelled { partial: Box::new(record) });
                }
                outcome = transfer => outcome,
            };

            let failure = match outcome {
                Ok(Ok(StoreOutcome { accepted: true, .. })) => None,
                Ok(Ok(StoreOutcome { message, .. })) => Some(TransferError::Rejected(message)),
                Ok(Err(e)) => Some(e),
                Err(_) => Some(TransferError::Timeout(self.settings.transfer_timeout)),
            };

            if let Some(source) = failure {
                error!(
                    "Failed to transfer chunk {} to {}: {}",
                    chunk_id, node_id, source
                );
                if matches!(source, TransferError::Timeout(_)) {
                    self.withdraw_chunk(&node_id, client, &chunk_id);
                }
                record.distribution_time_ms = started.elapsed().as_millis() as u64;
                return Err(Error::ChunkTransferFailed {
                    chunk_id,
                    node_id,
                    source,
                    partial: Box::new(record),
                });
            }

            info!(
                "Transferred {} in {} ms",
                chunk_id,
                transfer_started.elapsed().as_millis()
            );
            record.add_chunk_to_node(&node_id, chunk_id, chunk_checksum);

            self.refresh_node(&node_id).await;
        }

        record.distribution_time_ms = started.elapsed().as_millis() as u64;

        self.refresh_all_statuses().await;

        info!(
            "Distribution of {} completed in {} ms",
            record.file_name, record.distribution_time_ms
        );

        Ok(record)
    }

    /// Read a distributed file back, verifying every chunk
    pub async fn retrieve_file(&self, record: &DistributionRecord) -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(record.total_size_bytes as usize);

        for chunk_id in record.chunk_ids() {
            let node_id = record
                .node_for_chunk(&chunk_id)
                .ok_or_else(|| Error::UnplacedChunk(chunk_id.clone()))?;
            let client = self.client_for(node_id).await?;

            let bytes = tokio::time::timeout(
                self.settings.transfer_timeout,
                client.retrieve_chunk(&chunk_id),
            )
            .await
            .unwrap_or(Err(TransferError::Timeout(self.settings.transfer_timeout)))
            .map_err(|source| Error::Node {
                node_id: node_id.to_string(),
                source,
            })?
            .ok_or_else(|| Error::ChunkNotFound {
                chunk_id: chunk_id.clone(),
                node_id: node_id.to_string(),
            })?;

            if let Some(expected) = record.chunk_checksums.get(&chunk_id) {
                if checksum(&bytes) != *expected {
                    error!("Checksum mismatch for {} from {}", chunk_id, node_id);
                    return Err(Error::ChecksumMismatch(chunk_id));
                }
            }

            data.extend_from_slice(&bytes);
        }

        info!("Retrieved {} ({} bytes)", record.file_name, data.len());
        Ok(data)
    }

    /// Delete every placed chunk of a distribution, returning how many were removed
    pub async fn delete_file(&self, record: &DistributionRecord) -> Result<usize> {
        let mut deleted = 0;

        for (node_id, chunk_ids) in &record.node_to_chunk_ids {
            let client = self.client_for(node_id).await?;

            for chunk_id in chunk_ids {
                let removed = tokio::time::timeout(
                    self.settings.transfer_timeout,
                    client.delete_chunk(chunk_id),
                )
                .await
                .unwrap_or(Err(TransferError::Timeout(self.settings.transfer_timeout)))
                .map_err(|source| Error::Node {
                    node_id: node_id.clone(),
                    source,
                })?;

                if removed {
                    deleted += 1;
                } else {
                    warn!("Chunk {} was already gone from {}", chunk_id, node_id);
                }
            }
        }

        self.refresh_all_statuses().await;

        info!("Deleted {} chunk(s) of {}", deleted, record.file_name);
        Ok(deleted)
    }

    /// Poll every registered node. Failed polls are logged and skipped.
    ///
    /// Returns the number of nodes that answered.
    pub async fn refresh_all_statuses(&self) -> usize {
        let nodes: Vec<(String, Arc<dyn NodeClient>)> = {
            let registry = self.registry.read().await;
            registry
                .iter()
                .map(|(id, node)| (id.clone(), node.client.clone()))
                .collect()
        };

        let polls = nodes
            .iter()
            .map(|(id, client)| self.poll_status(id, client.as_ref()));
        let statuses = join_all(polls).await;

        let mut refreshed = 0;
        for status in statuses.into_iter().flatten() {
            self.metrics.update_node_status(status).await;
            refreshed += 1;
        }
        refreshed
    }

    /// Aggregate usage over all registered nodes, from a fresh poll
    pub async fn network_stats(&self) -> NetworkStats {
        self.refresh_all_statuses().await;

        let registered: Vec<String> = {
            let registry = self.registry.read().await;
            registry.keys().cloned().collect()
        };

        self.metrics.network_metrics(&registered).await
    }

    /// Close every connection and empty the registry
    pub async fn shutdown(&self) {
        info!("Shutting down network coordinator...");

        let nodes = {
            let mut registry = self.registry.write().await;
            std::mem::take(&mut *registry)
        };

        let closes = nodes
            .into_iter()
            .map(|(id, node)| async move { self.close_connection(&id, node.client).await });
        join_all(closes).await;

        self.metrics.clear().await;

        info!("Network coordinator shutdown complete");
    }

    async fn select_target(&self, required_bytes: u64) -> Result<(String, Arc<dyn NodeClient>)> {
        let registry = self.registry.read().await;
        let candidates: Vec<&str> = registry.keys().map(String::as_str).collect();
        let statuses = self.metrics.snapshot().await;

        let node_id = self.selector.select(&candidates, &statuses, required_bytes)?;
        let client = registry
            .get(&node_id)
            .map(|node| node.client.clone())
            .ok_or_else(|| Error::UnknownNode(node_id.clone()))?;

        Ok((node_id, client))
    }

    async fn client_for(&self, node_id: &str) -> Result<Arc<dyn NodeClient>> {
        let registry = self.registry.read().await;
        registry
            .get(node_id)
            .map(|node| node.client.clone())
            .ok_or_else(|| Error::UnknownNode(node_id.to_string()))
    }

    async fn refresh_node(&self, node_id: &str) -> bool {
        let Ok(client) = self.client_for(node_id).await else {
            return false;
        };

        match self.poll_status(node_id, client.as_ref()).await {
            Some(status) => {
                self.metrics.update_node_status(status).await;
                true
            }
            None => false,
        }
    }

    async fn poll_status(&self, node_id: &str, client: &dyn NodeClient) -> Option<NodeStatus> {
        match tokio::time::timeout(self.settings.status_timeout, client.status()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                warn!("Failed to get status from node {}: {}", node_id, e);
                None
            }
            Err(_) => {
                warn!(
                    "Status poll of node {} timed out after {:?}",
                    node_id, self.settings.status_timeout
                );
                None
            }
        }
    }

    /// Delete an abandoned chunk in case its store still lands.
    ///
    /// Nodes serialize stores and deletes, so a delete that arrives behind an
    /// in-flight store removes the chunk once it commits.
    fn withdraw_chunk(&self, node_id: &str, client: Arc<dyn NodeClient>, chunk_id: &str) {
        let node_id = node_id.to_string();
        let chunk_id = chunk_id.to_string();
        let limit = self.settings.transfer_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(limit, client.delete_chunk(&chunk_id)).await {
                Ok(Ok(true)) => info!("Withdrew abandoned chunk {} from {}", chunk_id, node_id),
                Ok(Ok(false)) => debug!("Abandoned chunk {} never landed on {}", chunk_id, node_id),
                Ok(Err(e)) => warn!(
                    "Failed to withdraw chunk {} from {}: {}",
                    chunk_id, node_id, e
                ),
                Err(_) => warn!(
                    "Withdrawing chunk {} from {} timed out after {:?}",
                    chunk_id, node_id, limit
                ),
            }
        });
    }

    async fn close_connection(&self, node_id: &str, client: Arc<dyn NodeClient>) {
        match tokio::time::timeout(self.settings.shutdown_grace, client.close()).await {
            Ok(()) => info!("Closed connection to {}", node_id),
            Err(_) => warn!(
                "Connection to {} did not close within {:?}, abandoning it",
                node_id, self.settings.shutdown_grace
            ),
        }
    }
}
