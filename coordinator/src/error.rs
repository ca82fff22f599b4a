use std::time::Duration;
use thiserror::Error;

use crate::coordinator::DistributionRecord;

/// Why a single call to a node failed
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("node rejected chunk: {0}")]
    Rejected(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection is closed")]
    Closed,

    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("node already registered: {0}")]
    DuplicateNode(String),

    #[error("node not registered: {0}")]
    UnknownNode(String),

    #[error("node {0} is already running")]
    AlreadyRunning(String),

    #[error("node {0} is not running")]
    NotRunning(String),

    #[error("failed to start node {node_id}: {reason}")]
    StartFailed { node_id: String, reason: String },

    #[error("failed to stop node {node_id}: {reason}")]
    StopFailed { node_id: String, reason: String },

    #[error("no nodes available for storage")]
    NoAvailableNodes,

    /// A chunk could not be placed. Chunks placed before it stay where they are
    /// and are listed in `partial`.
    #[error("transfer of chunk {chunk_id} to node {node_id} failed: {source}")]
    ChunkTransferFailed {
        chunk_id: String,
        node_id: String,
        #[source]
        source: TransferError,
        partial: Box<DistributionRecord>,
    },

    #[error("distribution of {} cancelled after {} chunk(s)", .partial.file_name, .partial.placed_chunks())]
    Cancelled { partial: Box<DistributionRecord> },

    #[error("chunk {0} has no recorded placement")]
    UnplacedChunk(String),

    #[error("chunk {chunk_id} not found on node {node_id}")]
    ChunkNotFound { chunk_id: String, node_id: String },

    #[error("chunk {0} failed checksum verification")]
    ChecksumMismatch(String),

    #[error("request to node {node_id} failed: {source}")]
    Node {
        node_id: String,
        #[source]
        source: TransferError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
