//! Health API server

use shardlet_core::{ApiConfig, ShardletError, ShardletResult};
use shardlet_scheduler::WorkerPool;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::rest::create_router;

/// Bind the listener for the configured address and port
pub async fn bind(config: &ApiConfig) -> ShardletResult<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.address, config.port)
        .parse()
        .map_err(|e| {
            ShardletError::Config(format!(
                "invalid API address {}:{}: {}",
                config.address, config.port, e
            ))
        })?;

    let listener = TcpListener::bind(addr).await?;
    info!("Health API listening on {}", listener.local_addr()?);
    Ok(listener)
}

/// Serve the health router until `shutdown` resolves
pub async fn serve<F>(
    listener: TcpListener,
    pool: Arc<WorkerPool>,
    shutdown: F,
) -> ShardletResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(pool);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("Health API stopped");
    Ok(())
}
