//! Coordinator for the chunkmesh network.
//!
//! Splits files into chunks, places each chunk on the least utilized
//! registered storage node and keeps track of where everything went. Also
//! starts and stops local node processes and exposes both over HTTP.

pub mod api;
pub mod chunker;
pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod selector;
pub mod types;

pub use chunker::{Chunk, ChunkSize, Chunker};
pub use client::{GrpcConnector, NodeClient, NodeConnector};
pub use config::{CoordinatorConfig, NodeEntry};
pub use coordinator::{CoordinatorSettings, DistributionRecord, NetworkCoordinator, NodeDescriptor};
pub use error::{Error, Result, TransferError};
pub use lifecycle::{LifecycleConfig, NodeLaunchSpec, NodeLifecycleManager};
pub use metrics::{NetworkStats, StorageMetrics};
pub use selector::LoadBalancer;
