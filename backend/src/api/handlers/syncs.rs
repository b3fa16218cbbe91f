//! Diff preview and sync handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

use crate::api::dto::{Pagination, PaginationQuery};
use crate::api::openapi::ErrorResponse;
use crate::api::SharedState;
use crate::error::Result;
use crate::models::index_spec::IndexSpec;
use crate::models::sync_record::{SyncRecord, SyncStatus};
use crate::services::index_diff::CollectionDiff;
use crate::services::index_sync_service::IndexSyncService;

#[derive(OpenApi)]
#[openapi(
    paths(compare_indexes, start_sync, list_syncs, get_sync),
    components(schemas(
        CollectionsRequest,
        CollectionDiff,
        IndexSpec,
        SyncRecord,
        SyncStatus,
        SyncListResponse,
    ))
)]
pub struct SyncsApiDoc;

/// Routes under `/api/v1/databases`.
pub fn database_router() -> Router<SharedState> {
    Router::new()
        .route("/:id/compare", post(compare_indexes))
        .route("/:id/syncs", get(list_syncs).post(start_sync))
}

/// Routes under `/api/v1/syncs`.
pub fn router() -> Router<SharedState> {
    Router::new().route("/:id", get(get_sync))
}

/// Collections to compare or sync. Omitted means every collection with
/// declared indexes.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CollectionsRequest {
    pub collections: Option<Vec<String>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SyncListResponse {
    pub items: Vec<SyncRecord>,
    pub pagination: Pagination,
}

fn sync_service(state: &SharedState) -> IndexSyncService {
    IndexSyncService::new(
        state.db.clone(),
        state.connector.clone(),
        state.queue.clone(),
    )
}

/// POST /api/v1/databases/:id/compare
#[utoipa::path(
    post,
    path = "/{id}/compare",
    context_path = "/api/v1/databases",
    tag = "syncs",
    operation_id = "compare_indexes",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
    ),
    request_body = CollectionsRequest,
    responses(
        (status = 200, description = "Per-collection diff", body = Vec<CollectionDiff>),
        (status = 400, description = "Invalid collection list", body = ErrorResponse),
        (status = 404, description = "Database not found", body = ErrorResponse),
        (status = 412, description = "Cannot read the live database", body = ErrorResponse),
    )
)]
pub async fn compare_indexes(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CollectionsRequest>,
) -> Result<Json<Vec<CollectionDiff>>> {
    let service = sync_service(&state);
    let diffs = match payload.collections {
        Some(collections) => service.compare_by_collections(id, &collections).await?,
        None => service.compare_by_database(id).await?,
    };
    Ok(Json(diffs))
}

/// POST /api/v1/databases/:id/syncs
#[utoipa::path(
    post,
    path = "/{id}/syncs",
    context_path = "/api/v1/databases",
    tag = "syncs",
    operation_id = "start_sync",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
    ),
    request_body = CollectionsRequest,
    responses(
        (status = 201, description = "Sync enqueued", body = SyncRecord),
        (status = 400, description = "Nothing to sync", body = ErrorResponse),
        (status = 404, description = "Database not found", body = ErrorResponse),
        (status = 409, description = "A sync is already in progress", body = ErrorResponse),
        (status = 412, description = "Cannot read the live database", body = ErrorResponse),
    )
)]
pub async fn start_sync(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CollectionsRequest>,
) -> Result<(StatusCode, Json<SyncRecord>)> {
    let service = sync_service(&state);
    let record = match payload.collections {
        Some(collections) => service.start_sync(id, &collections).await?,
        None => service.start_database_sync(id).await?,
    };
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/databases/:id/syncs
#[utoipa::path(
    get,
    path = "/{id}/syncs",
    context_path = "/api/v1/databases",
    tag = "syncs",
    operation_id = "list_syncs",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
        PaginationQuery,
    ),
    responses(
        (status = 200, description = "Syncs, newest first", body = SyncListResponse),
        (status = 404, description = "Database not found", body = ErrorResponse),
    )
)]
pub async fn list_syncs(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<SyncListResponse>> {
    let max = state.max_per_page();
    let (limit, offset) = page.limit_offset(max);
    let (items, total) = sync_service(&state).list_syncs(id, limit, offset).await?;

    Ok(Json(SyncListResponse {
        items,
        pagination: Pagination::from_query_and_total(&page, max, total),
    }))
}

/// GET /api/v1/syncs/:id
#[utoipa::path(
    get,
    path = "/{id}",
    context_path = "/api/v1/syncs",
    tag = "syncs",
    operation_id = "get_sync",
    params(
        ("id" = Uuid, Path, description = "Sync ID"),
    ),
    responses(
        (status = 200, description = "Sync status and progress", body = SyncRecord),
        (status = 404, description = "Sync not found", body = ErrorResponse),
    )
)]
pub async fn get_sync(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncRecord>> {
    Ok(Json(sync_service(&state).get_sync(id).await?))
}
