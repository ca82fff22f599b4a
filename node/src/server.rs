use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::proto::node_service_server::NodeServiceServer;
use crate::service::ChunkTransferService;
use crate::storage::StorageNode;

/// Chunks travel as single messages, so tonic's 4 MiB default is lifted.
pub const MAX_MESSAGE_BYTES: usize = usize::MAX;

/// A storage node bound to its protocol endpoint
pub struct NodeServer {
    config: NodeConfig,
    node: Arc<StorageNode>,
}

impl NodeServer {
    pub fn new(config: NodeConfig) -> Result<Self, NodeError> {
        config.validate()?;
        let node = Arc::new(StorageNode::new(&config));
        Ok(Self { config, node })
    }

    pub fn node(&self) -> Arc<StorageNode> {
        self.node.clone()
    }

    /// Bind the configured address and serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), NodeError> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        self.serve_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    ///
    /// Once `shutdown` fires no new calls are accepted; in-flight calls get
    /// `shutdown_grace` to finish before the server task is dropped.
    pub async fn serve_with_listener(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), NodeError> {
        let node_id = self.config.node_id.clone();
        let grace = self.config.shutdown_grace;
        let local_addr = listener.local_addr()?;

        let service = NodeServiceServer::new(ChunkTransferService::new(self.node))
            .max_decoding_message_size(MAX_MESSAGE_BYTES)
            .max_encoding_message_size(MAX_MESSAGE_BYTES);

        let incoming = TcpListenerStream::new(listener);
        let signal = shutdown.clone().cancelled_owned();

        let mut server = tokio::spawn(
            Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(incoming, signal),
        );

        info!("Node {} started on {}", node_id, local_addr);

        tokio::select! {
            result = &mut server => {
                result??;
                return Ok(());
            }
            _ = shutdown.cancelled() => {}
        }

        info!("Shutting down node {} (grace period {:?})", node_id, grace);

        match tokio::time::timeout(grace, &mut server).await {
            Ok(result) => {
                result??;
                info!("Node {} stopped", node_id);
            }
            Err(_) => {
                warn!(
                    "Node {} did not drain within {:?}, abandoning in-flight calls",
                    node_id, grace
                );
                server.abort();
            }
        }

        Ok(())
    }
}

/// Resolves on SIGINT, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
