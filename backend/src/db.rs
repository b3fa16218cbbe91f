//! Manager store connection pool setup.

use crate::error::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create a new manager store connection pool.
///
/// Sized so every task queue worker can hold a connection while the
/// request path keeps a few of its own.
pub async fn create_pool(database_url: &str, workers: usize) -> Result<PgPool> {
    let max_connections = (workers as u32).saturating_add(10);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run the embedded migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}
