use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::ApiServerConfig,
    errors::{Error, Result},
};

use super::routes::{build_router, ApiState};

/// Serve the API until `shutdown` resolves, then drain in-flight requests.
pub async fn start_api_server<F>(config: ApiServerConfig, state: ApiState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| Error::config(format!("Invalid API address: {}", e)))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind API server: {}", e)))?;

    serve(listener, state, shutdown).await
}

/// Serve on an already-bound listener
pub async fn serve<F>(listener: TcpListener, state: ApiState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener
        .local_addr()
        .map_err(|e| Error::transport(format!("Failed to read API listener address: {}", e)))?;
    info!(address = %local_addr, "Starting HTTP API server");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::transport(format!("API server error: {}", e)))?;

    info!("HTTP API server stopped");
    Ok(())
}
