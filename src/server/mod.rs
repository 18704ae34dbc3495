//! CreditLedger HTTP server
//!
//! Thin JSON surface over [`SerialLedger`] using axum. Authentication and
//! request-level authorization belong to the registry in front of it.

pub mod handlers;
pub mod routes;

use axum::{extract::Extension, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::ledger::SerialLedger;

/// Shared application state
pub struct AppState {
    pub ledger: Arc<SerialLedger>,
    pub config: ServerConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish()
    }
}

/// Router with every route and layer, ready to serve.
pub fn build_router(ledger: Arc<SerialLedger>, config: ServerConfig) -> Router {
    let enable_cors = config.enable_cors;
    let state = AppState { ledger, config };

    let app = Router::new()
        .merge(routes::api_routes())
        .merge(routes::health_routes())
        .layer(Extension(Arc::new(state)))
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Start the ledger HTTP server
pub async fn start_server(config: ServerConfig, ledger: Arc<SerialLedger>) -> anyhow::Result<()> {
    crate::metrics::init_metrics();

    let addr = format!("{}:{}", config.bind, config.port);
    let app = build_router(ledger, config);
    let listener = TcpListener::bind(&addr).await?;

    info!("Server listening on http://{}", addr);
    info!("Metrics: http://{}/_metrics", addr);
    info!("Health: http://{}/_health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| {
            error!(error = %e, "Server error");
            anyhow::anyhow!("Server failed: {}", e)
        })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
