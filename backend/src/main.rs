//! Index Keeper - Main Entry Point

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use index_keeper_backend::{
    api,
    config::Config,
    db,
    error::Result,
    services::{
        index_sync_service::{SyncJobHandler, SYNC_TASK_TYPE},
        mongo_catalog::{CatalogTimeouts, MongoConnector},
        sync_record_service::SyncRecordService,
        task_queue::{PgTaskStore, TaskQueue, TaskQueueConfig},
    },
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    telemetry::init_tracing(&config.log_level);
    tracing::info!(config = ?config, "Starting Index Keeper");

    // Connect to the manager store
    let db_pool = db::create_pool(&config.database_url, config.task_queue_concurrency).await?;
    tracing::info!("Connected to database");

    db::migrate(&db_pool).await?;
    tracing::info!("Database migrations complete");

    let connector = Arc::new(MongoConnector::new(CatalogTimeouts::from_config(&config)));

    // Task queue with the sync job handler
    let queue = Arc::new(TaskQueue::new(
        Arc::new(PgTaskStore::new(db_pool.clone())),
        TaskQueueConfig::from_config(&config),
    ));
    queue.register_handler(
        SYNC_TASK_TYPE,
        Arc::new(SyncJobHandler::new(
            connector.clone(),
            Arc::new(SyncRecordService::new(db_pool.clone())),
        )),
    )?;
    queue.start()?;

    let state = Arc::new(api::AppState::new(
        config.clone(),
        db_pool,
        queue.clone(),
        connector,
    ));

    // Build router
    let app = Router::new()
        .merge(api::routes::create_router(state))
        .layer(axum::middleware::from_fn(
            api::middleware::tracing::correlation_id_middleware,
        ))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, draining task queue");
    queue.stop().await;

    Ok(())
}

/// Permissive CORS unless `CORS_ORIGINS` lists the allowed origins.
fn cors_layer() -> CorsLayer {
    match std::env::var("CORS_ORIGINS") {
        Ok(origins) if !origins.trim().is_empty() => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| match origin.trim().parse() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!(origin, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        }
        _ => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
