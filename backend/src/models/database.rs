//! Registered target database model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// A target database whose indexes are managed.
///
/// `uri` may embed credentials and is never logged.
#[derive(Clone, FromRow, Serialize, ToSchema)]
pub struct DatabaseConnection {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub uri: String,
    pub db_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

redacted_debug!(DatabaseConnection {
    show id,
    show name,
    show description,
    redact uri,
    show db_name,
    show created_at,
    show updated_at,
});

/// Declared collection with its number of declared indexes.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct CollectionSummary {
    pub collection: String,
    pub index_count: i64,
}
