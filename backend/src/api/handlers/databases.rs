//! Registered database handlers.

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
use crate::models::database::{CollectionSummary, DatabaseConnection};
use crate::services::database_service::{
    CreateDatabaseRequest, DatabaseService, UpdateDatabaseRequest,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        list_databases,
        create_database,
        get_database,
        update_database,
        delete_database,
        test_connection,
        list_collections,
    ),
    components(schemas(
        DatabaseConnection,
        CreateDatabaseRequest,
        UpdateDatabaseRequest,
        DatabaseListResponse,
        CollectionSummary,
        CollectionListResponse,
        TestConnectionRequest,
        TestConnectionResponse,
    ))
)]
pub struct DatabasesApiDoc;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_databases).post(create_database))
        .route("/test-connection", post(test_connection))
        .route(
            "/:id",
            get(get_database)
                .patch(update_database)
                .delete(delete_database),
        )
        .route("/:id/collections", get(list_collections))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct SearchQuery {
    /// Case-insensitive substring filter on the name
    pub q: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DatabaseListResponse {
    pub items: Vec<DatabaseConnection>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CollectionListResponse {
    pub items: Vec<CollectionSummary>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TestConnectionRequest {
    pub uri: String,
    pub db_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TestConnectionResponse {
    pub reachable: bool,
}

/// GET /api/v1/databases
#[utoipa::path(
    get,
    path = "",
    context_path = "/api/v1/databases",
    tag = "databases",
    operation_id = "list_databases",
    params(SearchQuery, PaginationQuery),
    responses(
        (status = 200, description = "Registered databases", body = DatabaseListResponse),
    )
)]
pub async fn list_databases(
    State(state): State<SharedState>,
    Query(search): Query<SearchQuery>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<DatabaseListResponse>> {
    let max = state.max_per_page();
    let (limit, offset) = page.limit_offset(max);
    let service = DatabaseService::new(state.db.clone(), state.connector.clone());
    let (items, total) = service.list(search.q.as_deref(), limit, offset).await?;

    Ok(Json(DatabaseListResponse {
        items,
        pagination: Pagination::from_query_and_total(&page, max, total),
    }))
}

/// POST /api/v1/databases
#[utoipa::path(
    post,
    path = "",
    context_path = "/api/v1/databases",
    tag = "databases",
    operation_id = "create_database",
    request_body = CreateDatabaseRequest,
    responses(
        (status = 201, description = "Database registered", body = DatabaseConnection),
        (status = 400, description = "Invalid connection fields", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse),
        (status = 412, description = "Connection test failed", body = ErrorResponse),
    )
)]
pub async fn create_database(
    State(state): State<SharedState>,
    Json(payload): Json<CreateDatabaseRequest>,
) -> Result<(StatusCode, Json<DatabaseConnection>)> {
    let service = DatabaseService::new(state.db.clone(), state.connector.clone());
    let database = service.create(payload).await?;
    Ok((StatusCode::CREATED, Json(database)))
}

/// GET /api/v1/databases/:id
#[utoipa::path(
    get,
    path = "/{id}",
    context_path = "/api/v1/databases",
    tag = "databases",
    operation_id = "get_database",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
    ),
    responses(
        (status = 200, description = "Database details", body = DatabaseConnection),
        (status = 404, description = "Database not found", body = ErrorResponse),
    )
)]
pub async fn get_database(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DatabaseConnection>> {
    let service = DatabaseService::new(state.db.clone(), state.connector.clone());
    Ok(Json(service.get(id).await?))
}

/// PATCH /api/v1/databases/:id
#[utoipa::path(
    patch,
    path = "/{id}",
    context_path = "/api/v1/databases",
    tag = "databases",
    operation_id = "update_database",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
    ),
    request_body = UpdateDatabaseRequest,
    responses(
        (status = 200, description = "Database updated", body = DatabaseConnection),
        (status = 404, description = "Database not found", body = ErrorResponse),
        (status = 409, description = "Name already taken", body = ErrorResponse),
    )
)]
pub async fn update_database(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateDatabaseRequest>,
) -> Result<Json<DatabaseConnection>> {
    let service = DatabaseService::new(state.db.clone(), state.connector.clone());
    Ok(Json(service.update(id, payload).await?))
}

/// DELETE /api/v1/databases/:id
#[utoipa::path(
    delete,
    path = "/{id}",
    context_path = "/api/v1/databases",
    tag = "databases",
    operation_id = "delete_database",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
    ),
    responses(
        (status = 200, description = "Database deleted"),
        (status = 404, description = "Database not found", body = ErrorResponse),
        (status = 409, description = "A sync is in progress", body = ErrorResponse),
    )
)]
pub async fn delete_database(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<()> {
    let service = DatabaseService::new(state.db.clone(), state.connector.clone());
    service.delete(id).await?;
    Ok(())
}

/// POST /api/v1/databases/test-connection
#[utoipa::path(
    post,
    path = "/test-connection",
    context_path = "/api/v1/databases",
    tag = "databases",
    operation_id = "test_database_connection",
    request_body = TestConnectionRequest,
    responses(
        (status = 200, description = "Database reachable", body = TestConnectionResponse),
        (status = 400, description = "Invalid connection fields", body = ErrorResponse),
        (status = 412, description = "Cannot connect to database", body = ErrorResponse),
    )
)]
pub async fn test_connection(
    State(state): State<SharedState>,
    Json(payload): Json<TestConnectionRequest>,
) -> Result<Json<TestConnectionResponse>> {
    let service = DatabaseService::new(state.db.clone(), state.connector.clone());
    service
        .test_connection(payload.uri.trim(), payload.db_name.trim())
        .await?;
    Ok(Json(TestConnectionResponse { reachable: true }))
}

/// GET /api/v1/databases/:id/collections
#[utoipa::path(
    get,
    path = "/{id}/collections",
    context_path = "/api/v1/databases",
    tag = "databases",
    operation_id = "list_database_collections",
    params(
        ("id" = Uuid, Path, description = "Database ID"),
        SearchQuery,
        PaginationQuery,
    ),
    responses(
        (status = 200, description = "Collections with declared indexes", body = CollectionListResponse),
        (status = 404, description = "Database not found", body = ErrorResponse),
    )
)]
pub async fn list_collections(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Query(search): Query<SearchQuery>,
    Query(page): Query<PaginationQuery>,
) -> Result<Json<CollectionListResponse>> {
    let max = state.max_per_page();
    let (limit, offset) = page.limit_offset(max);
    let service = DatabaseService::new(state.db.clone(), state.connector.clone());
    let (items, total) = service
        .list_collections(id, search.q.as_deref(), limit, offset)
        .await?;

    Ok(Json(CollectionListResponse {
        items,
        pagination: Pagination::from_query_and_total(&page, max, total),
    }))
}
