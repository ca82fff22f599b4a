use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("invalid node configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient storage for chunk {chunk_id} (need {needed} bytes, available {available} bytes)")]
    CapacityExceeded {
        chunk_id: String,
        needed: u64,
        available: u64,
    },

    #[error("chunk {chunk_id} declares {declared} bytes but carries {actual}")]
    SizeMismatch {
        chunk_id: String,
        declared: u64,
        actual: u64,
    },

    #[error("chunk not found: {0}")]
    ChunkNotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
