//! HTTP surface of the metadata service.

pub mod api;
pub mod health;

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::sync::watch::Receiver as WatchReceiver;
use tower_http::trace::TraceLayer;

use crate::ServiceState;

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub fn router(state: ServiceState) -> Router {
    Router::new()
        .nest("/_status", health::router())
        .merge(api::router(state))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "no such route").into_response()
}

/// Serve until `shutdown_rx` fires, then drain in-flight requests.
pub async fn run(
    listen_addr: SocketAddr,
    state: ServiceState,
    mut shutdown_rx: WatchReceiver<()>,
) -> Result<(), HttpServerError> {
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|source| HttpServerError::Bind {
            addr: listen_addr,
            source,
        })?;
    tracing::info!(addr = %listener.local_addr()?, "metadata service listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("shutdown signal received, draining connections");
        })
        .await?;

    tracing::info!("metadata service stopped");
    Ok(())
}
