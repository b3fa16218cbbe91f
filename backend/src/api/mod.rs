//! API module - HTTP handlers and middleware.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;

use crate::config::Config;
use crate::services::mongo_catalog::CatalogConnector;
use crate::services::task_queue::TaskQueue;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    /// Task queue that runs sync jobs.
    pub queue: Arc<TaskQueue>,
    /// Opens catalog handles on target databases.
    pub connector: Arc<dyn CatalogConnector>,
}

impl AppState {
    pub fn new(
        config: Config,
        db: PgPool,
        queue: Arc<TaskQueue>,
        connector: Arc<dyn CatalogConnector>,
    ) -> Self {
        Self {
            config,
            db,
            queue,
            connector,
        }
    }

    /// Upper bound for `per_page` on list endpoints.
    pub fn max_per_page(&self) -> u32 {
        self.config.pagination_max_items
    }
}

pub type SharedState = Arc<AppState>;
