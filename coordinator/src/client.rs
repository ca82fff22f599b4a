use async_trait::async_trait;
use chunkmesh_node::proto::node_service_client::NodeServiceClient;
use chunkmesh_node::proto::{
    DeleteChunkRequest, RetrieveChunkRequest, StatusRequest, StoreChunkRequest,
};
use chunkmesh_node::{NodeStatus, MAX_MESSAGE_BYTES};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::{debug, info, warn};

use crate::chunker::Chunk;
use crate::error::{Error, Result, TransferError};

/// Answer of a node to a store request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    pub accepted: bool,
    pub message: String,
}

/// Live connection to one storage node
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn store_chunk(&self, chunk: Chunk) -> Result<StoreOutcome, TransferError>;

    /// `None` when the node does not hold the chunk
    async fn retrieve_chunk(&self, chunk_id: &str) -> Result<Option<Vec<u8>>, TransferError>;

    /// `false` when the node did not hold the chunk
    async fn delete_chunk(&self, chunk_id: &str) -> Result<bool, TransferError>;

    async fn status(&self) -> Result<NodeStatus, TransferError>;

    /// Stop accepting calls and release the connection once in-flight calls finish
    async fn close(&self);
}

/// Opens [`NodeClient`]s for registered nodes
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, node_id: &str, host: &str, port: u16) -> Result<Arc<dyn NodeClient>>;
}

/// Plaintext gRPC connections
pub struct GrpcConnector {
    connect_timeout: Duration,
}

impl GrpcConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl NodeConnector for GrpcConnector {
    async fn connect(&self, node_id: &str, host: &str, port: u16) -> Result<Arc<dyn NodeClient>> {
        if host.trim().is_empty() {
            return Err(Error::Configuration(format!("host is required for node {}", node_id)));
        }
        if port == 0 {
            return Err(Error::Configuration(format!("invalid port for node {}: {}", node_id, port)));
        }

        let uri = format!("http://{}:{}", host, port);
        let endpoint = Endpoint::from_shared(uri.clone())
            .map_err(|e| Error::Configuration(format!("invalid node address {}: {}", uri, e)))?
            .connect_timeout(self.connect_timeout);

        // The channel connects on first use and reconnects after failures
        let channel = endpoint.connect_lazy();
        let client = NodeServiceClient::new(channel)
            .max_decoding_message_size(MAX_MESSAGE_BYTES)
            .max_encoding_message_size(MAX_MESSAGE_BYTES);

        info!("Opened channel to node {} at {}", node_id, uri);

        Ok(Arc::new(GrpcNodeClient {
            node_id: node_id.to_string(),
            client: RwLock::new(Some(client)),
        }))
    }
}

/// Calls hold the read side of `client` for their whole duration, so
/// [`NodeClient::close`] waits for them before dropping the channel.
pub struct GrpcNodeClient {
    node_id: String,
    client: RwLock<Option<NodeServiceClient<Channel>>>,
}

#[async_trait]
impl NodeClient for GrpcNodeClient {
    async fn store_chunk(&self, chunk: Chunk) -> Result<StoreOutcome, TransferError> {
        let guard = self.client.read().await;
        let mut client = guard.as_ref().ok_or(TransferError::Closed)?.clone();

        let request = StoreChunkRequest {
            chunk_id: chunk.id().to_string(),
            size: chunk.size(),
            data: chunk.into_data(),
        };
        let resp = client.store_chunk(request).await?.into_inner();

        Ok(StoreOutcome {
            accepted: resp.success,
            message: resp.message,
        })
    }

    async fn retrieve_chunk(&self, chunk_id: &str) -> Result<Option<Vec<u8>>, TransferError> {
        let guard = self.client.read().await;
        let mut client = guard.as_ref().ok_or(TransferError::Closed)?.clone();

        let request = RetrieveChunkRequest {
            chunk_id: chunk_id.to_string(),
        };
        match client.retrieve_chunk(request).await {
            Ok(resp) => Ok(Some(resp.into_inner().data)),
            Err(status) if status.code() == Code::NotFound => Ok(None),
            Err(status) => Err(status.into()),
        }
    }

    async fn delete_chunk(&self, chunk_id: &str) -> Result<bool, TransferError> {
        let guard = self.client.read().await;
        let mut client = guard.as_ref().ok_or(TransferError::Closed)?.clone();

        let request = DeleteChunkRequest {
            chunk_id: chunk_id.to_string(),
        };
        let resp = client.delete_chunk(request).await?.into_inner();
        Ok(resp.deleted)
    }

    async fn status(&self) -> Result<NodeStatus, TransferError> {
        let guard = self.client.read().await;
        let mut client = guard.as_ref().ok_or(TransferError::Closed)?.clone();

        let resp = client.get_status(StatusRequest {}).await?.into_inner();

        if resp.used_storage > resp.total_storage {
            return Err(TransferError::Malformed(format!(
                "used storage {} exceeds total {}",
                resp.used_storage, resp.total_storage
            )));
        }
        if resp.node_id != self.node_id {
            warn!(
                "Node registered as {} reports itself as {}",
                self.node_id, resp.node_id
            );
        }

        Ok(NodeStatus::new(
            self.node_id.clone(),
            resp.used_storage,
            resp.total_storage,
            resp.num_chunks,
        ))
    }

    async fn close(&self) {
        let mut guard = self.client.write().await;
        if guard.take().is_some() {
            debug!("Dropped channel to {}", self.node_id);
        }
    }
}
