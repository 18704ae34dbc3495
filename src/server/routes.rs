//! HTTP routes definition

use axum::{routing::get, Router};

use super::handlers;

/// Ledger API routes
///
/// - POST /api/batches                          - Issue a batch
/// - GET  /api/batches                          - List batches
/// - GET  /api/batches/:id                      - Batch with holdings
/// - GET  /api/batches/:id/ranges/:org          - Serial ranges of an organization
/// - POST /api/batches/:id/transfers            - Transfer by quantity or range
/// - GET  /api/batches/:id/transfers            - Transfer history
/// - POST /api/batches/:id/retirements          - Retire and issue a certificate
/// - GET  /api/batches/:id/retirements          - Retirement history
/// - GET  /api/retirements/:certificate_id      - Certificate lookup
/// - GET  /api/orgs/:org/holdings               - Holdings across batches
/// - GET  /api/verify                           - Invariant audit
pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/batches",
            get(handlers::list_batches).post(handlers::issue_batch),
        )
        .route("/api/batches/:id", get(handlers::get_batch))
        .route("/api/batches/:id/ranges/:org", get(handlers::get_ranges))
        .route(
            "/api/batches/:id/transfers",
            get(handlers::list_transfers).post(handlers::create_transfer),
        )
        .route(
            "/api/batches/:id/retirements",
            get(handlers::list_retirements).post(handlers::create_retirement),
        )
        .route(
            "/api/retirements/:certificate_id",
            get(handlers::get_certificate),
        )
        .route("/api/orgs/:org/holdings", get(handlers::org_holdings))
        .route("/api/verify", get(handlers::verify))
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new()
        .route("/_health", get(handlers::health_check))
        .route("/health", get(handlers::health_check))
        .route("/_metrics", get(handlers::metrics))
}
