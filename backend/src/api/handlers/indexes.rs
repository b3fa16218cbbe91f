//! Declared index handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

use crate::api::dto::{Pagination, PaginationQuery};
use crate::api::openapi::ErrorResponse;
use crate::api::SharedState;
use crate::error::Result;
use crate::models::index_spec::{
    Collation, CollationInput, IndexDefinition, IndexKey, IndexKeyInput, IndexOptions,
    IndexOptionsInput,
};
use crate::services::index_service::{CreateIndexRequest, IndexService, UpdateIndexRequest};
use crate::services::index_sync_service::{ImportResult, IndexSyncService};

#[derive(OpenApi)]
#[openapi(
    paths(
        list_indexes,
        create_index,
        import_indexes,
        get_index,
        update_index,
        delete_index,
    ),
    components(schemas(
        IndexDefinition,
        IndexKey,
        IndexOptions,
        Collation,
        CreateIndexRequest,
        UpdateIndexRequest,
        IndexKeyInput,
        IndexOptionsInput,
        CollationInput,
        IndexListResponse,
        ImportResult,
    ))
)]
pub struct IndexesApiDoc;

/// Routes under `/api/v1/databases`.
pub fn database_router() -> Router<SharedState> {
    Router::new()
        .route("/:id/indexes", get(list_indexes).post(create_index))
        .route("/:id/indexes/import", post(import_indexes))
}

/// Routes under `/api/v1/indexes`.
pub fn router() -> Router<SharedState> {
    Router::new().route(
        "/:id",
        get(get_index).patch(update_index).delete(delete_index),
    )
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListIndexesQuery {
    /// Only indexes of this collection
    pub collection: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IndexListResponse {
    pub items: Vec<IndexDefinition>,
    pub pagination: Pagination,
}

/// GET /api/v1/databases/:id/indexes
#[utoipa::path(
    get,
    path = "/{id}/indexes",
    context_path = "/api/v1/databases",
    tag = "indexes",
    operation_id = "list_indexes",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
        ListIndexesQuery,
        PaginationQuery,
    ),
    responses(
        (status = 200, description = "Declared indexes", body = IndexListResponse),
        (status = 404, description = "Database not found", body = ErrorResponse),
    )
)]
pub async fn list_indexes(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(filter): Query<ListIndexesQuery>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<IndexListResponse>> {
    let max = state.max_per_page();
    let (limit, offset) = page.limit_offset(max);
    let service = IndexService::new(state.db.clone());
    let (items, total) = service
        .list_by_collection(id, filter.collection.as_deref(), limit, offset)
        .await?;

    Ok(Json(IndexListResponse {
        items,
        pagination: Pagination::from_query_and_total(&page, max, total),
    }))
}

/// POST /api/v1/databases/:id/indexes
#[utoipa::path(
    post,
    path = "/{id}/indexes",
    context_path = "/api/v1/databases",
    tag = "indexes",
    operation_id = "create_index",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
    ),
    request_body = CreateIndexRequest,
    responses(
        (status = 201, description = "Index declared", body = IndexDefinition),
        (status = 400, description = "Invalid index definition", body = ErrorResponse),
        (status = 404, description = "Database not found", body = ErrorResponse),
        (status = 409, description = "Conflicting index already declared", body = ErrorResponse),
    )
)]
pub async fn create_index(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateIndexRequest>,
) -> Result<(StatusCode, Json<IndexDefinition>)> {
    let service = IndexService::new(state.db.clone());
    let index = service.create(id, payload).await?;
    Ok((StatusCode::CREATED, Json(index)))
}

/// POST /api/v1/databases/:id/indexes/import
#[utoipa::path(
    post,
    path = "/{id}/indexes/import",
    context_path = "/api/v1/databases",
    tag = "indexes",
    operation_id = "import_indexes",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
    ),
    responses(
        (status = 200, description = "Live indexes imported", body = ImportResult),
        (status = 404, description = "Database not found", body = ErrorResponse),
        (status = 412, description = "Cannot read the live database", body = ErrorResponse),
    )
)]
pub async fn import_indexes(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ImportResult>> {
    let service = IndexSyncService::new(
        state.db.clone(),
        state.connector.clone(),
        state.queue.clone(),
    );
    Ok(Json(service.import_from_database(id).await?))
}

/// GET /api/v1/indexes/:id
#[utoipa::path(
    get,
    path = "/{id}",
    context_path = "/api/v1/indexes",
    tag = "indexes",
    operation_id = "get_index",
    params(
        ("id" = Uuid, Path, description = "Index ID"),
    ),
    responses(
        (status = 200, description = "Declared index", body = IndexDefinition),
        (status = 404, description = "Index not found", body = ErrorResponse),
    )
)]
pub async fn get_index(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IndexDefinition>> {
    let service = IndexService::new(state.db.clone());
    Ok(Json(service.get(id).await?))
}

/// PATCH /api/v1/indexes/:id
#[utoipa::path(
    patch,
    path = "/{id}",
    context_path = "/api/v1/indexes",
    tag = "indexes",
    operation_id = "update_index",
    params(
        ("id" = Uuid, Path, description = "Index ID"),
    ),
    request_body = UpdateIndexRequest,
    responses(
        (status = 200, description = "Index updated", body = IndexDefinition),
        (status = 400, description = "Invalid index definition", body = ErrorResponse),
        (status = 404, description = "Index not found", body = ErrorResponse),
        (status = 409, description = "Conflicting index already declared", body = ErrorResponse),
    )
)]
pub async fn update_index(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateIndexRequest>,
) -> Result<Json<IndexDefinition>> {
    let service = IndexService::new(state.db.clone());
    Ok(Json(service.update(id, payload).await?))
}

/// DELETE /api/v1/indexes/:id
#[utoipa::path(
    delete,
    path = "/{id}",
    context_path = "/api/v1/indexes",
    tag = "indexes",
    operation_id = "delete_index",
    params(
        ("id" = Uuid, Path, description = "Index ID"),
    ),
    responses(
        (status = 200, description = "Index deleted"),
        (status = 404, description = "Index not found", body = ErrorResponse),
    )
)]
pub async fn delete_index(State(state): State<SharedState>, Path(id): Path<Uuid>) -> Result<()> {
    let service = IndexService::new(state.db.clone());
    service.delete(id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_create_requires_keys() {
        let app = database_router().with_state(test_support::state());
        let body = serde_json::json!({"collection": "users"});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/{}/indexes", Uuid::new_v4()))
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_create_request_defaults_options() {
        let req: CreateIndexRequest = serde_json::from_value(serde_json::json!({
            "collection": "users",
            "keys": [{"field": "email", "value": 1}],
        }))
        .unwrap();
        assert!(req.name.is_none());
        assert!(req.options.is_unique.is_none());
        assert_eq!(req.keys[0].value, serde_json::json!(1));
    }
}
