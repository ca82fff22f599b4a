//! Storage node for the chunkmesh network.
//!
//! A node owns a fixed amount of storage, accepts chunks over the
//! `NodeService` gRPC protocol, enforces its capacity and simulates a
//! bandwidth-limited link for every accepted transfer.

pub mod config;
pub mod error;
pub mod server;
pub mod service;
pub mod storage;

// Include generated proto code
pub mod proto {
    tonic::include_proto!("chunkmesh");
}

pub use config::NodeConfig;
pub use error::NodeError;
pub use server::{shutdown_signal, NodeServer, MAX_MESSAGE_BYTES};
pub use service::ChunkTransferService;
pub use storage::{NodeStatus, StorageNode};
