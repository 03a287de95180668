use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{error, info};

use crate::metrics::FwMarkCollector;

/// Serves metrics on `/metrics` and, like a bare handler mounted at the root,
/// on every other path too.
pub fn router(collector: Arc<FwMarkCollector>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .fallback(metrics)
        .with_state(collector)
}

async fn metrics(State(collector): State<Arc<FwMarkCollector>>) -> Response {
    match collector.render().await {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

pub async fn serve(listen_address: &str, collector: Arc<FwMarkCollector>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_address)
        .await
        .with_context(|| format!("failed to bind {listen_address}"))?;
    info!(
        address = %listener.local_addr()?,
        table = collector.table(),
        chain = collector.chain(),
        "serving fwmark metrics"
    );

    axum::serve(listener, router(collector))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("failed to start http server")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
