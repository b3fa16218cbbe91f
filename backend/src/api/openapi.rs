//! OpenAPI specification generated from handler annotations via utoipa.

use utoipa::OpenApi;

/// Top-level OpenAPI document for the Index Keeper API.
///
/// Each handler module contributes its own paths and schemas via per-module
/// `#[derive(OpenApi)]` structs that are merged into this root document at
/// startup.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Index Keeper API",
        description = "Declare MongoDB indexes, preview their drift and sync them to live databases.",
        version = "0.1.0",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Current server"),
    ),
    tags(
        (name = "databases", description = "Registered target databases"),
        (name = "indexes", description = "Declared index definitions"),
        (name = "syncs", description = "Diff preview and index synchronization"),
        (name = "health", description = "Health and readiness checks"),
    ),
    components(schemas(ErrorResponse))
)]
pub struct ApiDoc;

/// Standard error response body returned by all endpoints on failure.
#[derive(serde::Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g. "NOT_FOUND", "VALIDATION_ERROR")
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

/// Build the merged OpenAPI document from all handler modules.
pub fn build_openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();

    doc.merge(super::handlers::health::HealthApiDoc::openapi());
    doc.merge(super::handlers::databases::DatabasesApiDoc::openapi());
    doc.merge(super::handlers::indexes::IndexesApiDoc::openapi());
    doc.merge(super::handlers::syncs::SyncsApiDoc::openapi());

    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_is_valid() {
        let spec = build_openapi();

        assert_eq!(spec.info.title, "Index Keeper API");

        for path in [
            "/health",
            "/api/v1/databases",
            "/api/v1/databases/{id}",
            "/api/v1/databases/test-connection",
            "/api/v1/databases/{id}/collections",
            "/api/v1/databases/{id}/indexes",
            "/api/v1/databases/{id}/indexes/import",
            "/api/v1/databases/{id}/compare",
            "/api/v1/databases/{id}/syncs",
            "/api/v1/indexes/{id}",
            "/api/v1/syncs/{id}",
        ] {
            assert!(
                spec.paths.paths.contains_key(path),
                "Missing documented path: {path}"
            );
        }

        let schemas = &spec.components.as_ref().unwrap().schemas;
        for schema in ["ErrorResponse", "IndexSpec", "CollectionDiff", "SyncRecord"] {
            assert!(schemas.contains_key(schema), "Missing schema: {schema}");
        }

        let tags: Vec<&str> = spec
            .tags
            .as_ref()
            .map_or(vec![], |t| t.iter().map(|tag| tag.name.as_str()).collect());
        for expected_tag in ["databases", "indexes", "syncs", "health"] {
            assert!(
                tags.contains(&expected_tag),
                "Missing expected tag: {expected_tag}"
            );
        }
    }

    #[test]
    fn test_operation_ids_are_unique() {
        let spec = build_openapi();
        let mut seen = std::collections::HashSet::new();

        for item in spec.paths.paths.values() {
            for op in [&item.get, &item.post, &item.patch, &item.delete]
                .into_iter()
                .flatten()
            {
                if let Some(id) = &op.operation_id {
                    assert!(seen.insert(id.clone()), "Duplicate operation_id: {id}");
                }
            }
        }
        assert!(seen.len() >= 17, "Expected at least 17 operations, got {}", seen.len());
    }
}
