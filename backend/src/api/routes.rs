//! Route definitions for the API.

use axum::{routing::get, Json, Router};

use super::handlers;
use super::SharedState;

/// Create the main API router
pub fn create_router(state: SharedState) -> Router {
    // Build OpenAPI spec once at startup
    let openapi = super::openapi::build_openapi();

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/healthz", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .route("/readyz", get(handlers::health::readiness_check))
        .route("/livez", get(handlers::health::liveness_check))
        .route(
            "/api/v1/openapi.json",
            get(move || std::future::ready(Json(openapi.clone()))),
        )
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

/// API v1 routes
fn api_v1_routes() -> Router<SharedState> {
    Router::new()
        .nest(
            "/databases",
            handlers::databases::router()
                .merge(handlers::indexes::database_router())
                .merge(handlers::syncs::database_router()),
        )
        .nest("/indexes", handlers::indexes::router())
        .nest("/syncs", handlers::syncs::router())
}
