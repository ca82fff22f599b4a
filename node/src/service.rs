use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::{info, warn};

use crate::error::NodeError;
use crate::proto::node_service_server::NodeService;
use crate::proto::{
    DeleteChunkRequest, DeleteChunkResponse, RetrieveChunkRequest, RetrieveChunkResponse,
    StatusRequest, StatusResponse, StoreChunkRequest, StoreChunkResponse,
};
use crate::storage::StorageNode;

/// gRPC front of a [`StorageNode`]
///
/// Implements the 4 RPCs of the transfer protocol:
/// 1. StoreChunk - Capacity-checked, bandwidth-delayed write
/// 2. RetrieveChunk - Read back a stored chunk
/// 3. DeleteChunk - Free a chunk's storage
/// 4. GetStatus - Storage usage snapshot
pub struct ChunkTransferService {
    node: Arc<StorageNode>,
}

impl ChunkTransferService {
    pub fn new(node: Arc<StorageNode>) -> Self {
        Self { node }
    }
}

#[tonic::async_trait]
impl NodeService for ChunkTransferService {
    async fn store_chunk(
        &self,
        request: Request<StoreChunkRequest>,
    ) -> Result<Response<StoreChunkResponse>, Status> {
        let req = request.into_inner();
        let chunk_id = req.chunk_id;
        let actual = req.data.len() as u64;

        info!("RPC: StoreChunk(chunk_id={}, size={})", chunk_id, req.size);

        if chunk_id.is_empty() {
            return Err(Status::invalid_argument("chunk_id is required"));
        }

        if req.size != actual {
            let err = NodeError::SizeMismatch {
                chunk_id,
                declared: req.size,
                actual,
            };
            warn!("Rejected malformed store: {}", err);
            return Ok(Response::new(StoreChunkResponse {
                success: false,
                message: err.to_string(),
            }));
        }

        match self.node.store(&chunk_id, req.data).await {
            Ok(()) => Ok(Response::new(StoreChunkResponse {
                success: true,
                message: format!("Stored chunk {} on {}", chunk_id, self.node.node_id()),
            })),
            Err(e) => Ok(Response::new(StoreChunkResponse {
                success: false,
                message: e.to_string(),
            })),
        }
    }

    async fn retrieve_chunk(
        &self,
        request: Request<RetrieveChunkRequest>,
    ) -> Result<Response<RetrieveChunkResponse>, Status> {
        let chunk_id = request.into_inner().chunk_id;

        info!("RPC: RetrieveChunk(chunk_id={})", chunk_id);

        match self.node.retrieve(&chunk_id).await {
            Some(data) => Ok(Response::new(RetrieveChunkResponse { chunk_id, data })),
            None => Err(Status::not_found(
                NodeError::ChunkNotFound(chunk_id).to_string(),
            )),
        }
    }

    async fn delete_chunk(
        &self,
        request: Request<DeleteChunkRequest>,
    ) -> Result<Response<DeleteChunkResponse>, Status> {
        let chunk_id = request.into_inner().chunk_id;

        info!("RPC: DeleteChunk(chunk_id={})", chunk_id);

        let freed = self.node.delete(&chunk_id).await;
        Ok(Response::new(DeleteChunkResponse {
            deleted: freed.is_some(),
            freed_bytes: freed.unwrap_or(0),
        }))
    }

    async fn get_status(
        &self,
        _request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let status = self.node.status().await;

        Ok(Response::new(StatusResponse {
            node_id: status.node_id,
            used_storage: status.used_bytes,
            total_storage: status.total_bytes,
            num_chunks: status.chunk_count,
            utilization_percent: status.utilization_percent,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(capacity: u64) -> ChunkTransferService {
        ChunkTransferService::new(Arc::new(StorageNode::with_capacity(
            "node1",
            capacity,
            1_000_000_000_000,
        )))
    }

    #[tokio::test]
    async fn test_store_then_status() {
        let svc = service(1024);

        let resp = svc
            .store_chunk(Request::new(StoreChunkRequest {
                chunk_id: "f-chunk-0".to_string(),
                data: vec![1u8; 10],
                size: 10,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.success, "{}", resp.message);

        let status = svc
            .get_status(Request::new(StatusRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(status.node_id, "node1");
        assert_eq!(status.used_storage, 10);
        assert_eq!(status.total_storage, 1024);
        assert_eq!(status.num_chunks, 1);
    }

    #[tokio::test]
    async fn test_store_rejections_are_not_rpc_errors() {
        let svc = service(5);

        let over = svc
            .store_chunk(Request::new(StoreChunkRequest {
                chunk_id: "big".to_string(),
                data: vec![0u8; 10],
                size: 10,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!over.success);
        assert!(over.message.contains("insufficient storage"));

        let malformed = svc
            .store_chunk(Request::new(StoreChunkRequest {
                chunk_id: "odd".to_string(),
                data: vec![0u8; 3],
                size: 4,
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(!malformed.success);
    }

    #[tokio::test]
    async fn test_retrieve_missing_is_not_found() {
        let svc = service(1024);

        let err = svc
            .retrieve_chunk(Request::new(RetrieveChunkRequest {
                chunk_id: "nope".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_delete_reports_freed_bytes() {
        let svc = service(1024);
        svc.store_chunk(Request::new(StoreChunkRequest {
            chunk_id: "a".to_string(),
            data: vec![0u8; 64],
            size: 64,
        }))
        .await
        .unwrap();

        let resp = svc
            .delete_chunk(Request::new(DeleteChunkRequest {
                chunk_id: "a".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(resp.deleted);
        assert_eq!(resp.freed_bytes, 64);
    }
}
