//! Declared index definitions.

use std::collections::BTreeMap;

use serde::Deserialize;
use sqlx::types::Json;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{conflict_on_unique, AppError, Result};
use crate::models::index_spec::{
    CollationInput, IndexDefinition, IndexKeyInput, IndexOptionsInput, IndexSpec,
};
use crate::services::database_service::fetch_database;
use crate::services::index_signature::build_declared_spec;

const INDEX_COLUMNS: &str = "id, database_id, collection, name, key_signature, keys, options, \
                             is_text, created_at, updated_at";

/// Request to declare an index on a collection.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateIndexRequest {
    pub collection: String,
    /// Defaults to the key signature.
    pub name: Option<String>,
    pub keys: Vec<IndexKeyInput>,
    #[serde(default)]
    pub options: IndexOptionsInput,
}

/// Request to change a declared index. Omitted fields keep their value;
/// `options`, when present, replaces the options as a whole.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateIndexRequest {
    pub name: Option<String>,
    pub keys: Option<Vec<IndexKeyInput>>,
    pub options: Option<IndexOptionsInput>,
}

/// Why `spec` cannot be declared next to `existing` on the same collection.
pub fn find_conflict(spec: &IndexSpec, existing: &[IndexSpec]) -> Option<String> {
    for other in existing {
        if other.name == spec.name {
            return Some(format!(
                "An index named '{}' already exists on collection '{}'",
                spec.name, spec.collection
            ));
        }
        if other.key_signature == spec.key_signature {
            return Some(format!(
                "Index '{}' on collection '{}' already has the same definition",
                other.name, spec.collection
            ));
        }
        if spec.options.is_unique
            && other.options.is_unique
            && other.key_fields() == spec.key_fields()
        {
            return Some(format!(
                "Unique index '{}' on collection '{}' already covers these fields",
                other.name, spec.collection
            ));
        }
    }
    None
}

fn validate_collection_name(collection: &str) -> Result<()> {
    if collection.is_empty() || collection.contains('$') || collection.starts_with("system.") {
        return Err(AppError::Validation(format!(
            "invalid collection name '{collection}'"
        )));
    }
    Ok(())
}

pub struct IndexService {
    db: PgPool,
}

impl IndexService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create(&self, database_id: Uuid, req: CreateIndexRequest) -> Result<IndexDefinition> {
        fetch_database(&self.db, database_id).await?;
        let collection = req.collection.trim();
        validate_collection_name(collection)?;

        let spec = build_declared_spec(collection, req.name.as_deref(), &req.keys, &req.options)?;
        let existing = self.collection_specs(database_id, collection, None).await?;
        if let Some(reason) = find_conflict(&spec, &existing) {
            return Err(AppError::Conflict(reason));
        }

        let definition = self.insert_spec(database_id, &spec).await?;
        tracing::info!(
            index_id = %definition.id,
            collection = %definition.collection,
            signature = %definition.key_signature,
            "Declared index"
        );
        Ok(definition)
    }

    pub async fn get(&self, id: Uuid) -> Result<IndexDefinition> {
        sqlx::query_as::<_, IndexDefinition>(&format!(
            "SELECT {INDEX_COLUMNS} FROM index_definitions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?
        .ok_or_else(|| AppError::NotFound("Index not found".to_string()))
    }

    /// Declared indexes of a database, optionally narrowed to one collection.
    pub async fn list_by_collection(
        &self,
        database_id: Uuid,
        collection: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<IndexDefinition>, i64)> {
        fetch_database(&self.db, database_id).await?;
        let collection = collection.map(str::trim).filter(|c| !c.is_empty());

        let items = sqlx::query_as::<_, IndexDefinition>(&format!(
            r#"
            SELECT {INDEX_COLUMNS} FROM index_definitions
            WHERE database_id = $1 AND ($2::TEXT IS NULL OR collection = $2)
            ORDER BY collection, name
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(database_id)
        .bind(collection)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM index_definitions
            WHERE database_id = $1 AND ($2::TEXT IS NULL OR collection = $2)
            "#,
        )
        .bind(database_id)
        .bind(collection)
        .fetch_one(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok((items, total))
    }

    pub async fn update(&self, id: Uuid, req: UpdateIndexRequest) -> Result<IndexDefinition> {
        let current = self.get(id).await?;

        let spec = match (&req.keys, &req.options) {
            (None, None) => {
                let mut spec = current.to_spec();
                if let Some(name) = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                    spec.name = name.to_string();
                }
                spec
            }
            _ => {
                let keys = match req.keys {
                    Some(keys) => keys,
                    None => current
                        .keys
                        .0
                        .iter()
                        .map(|k| {
                            Ok(IndexKeyInput {
                                field: k.field.clone(),
                                value: serde_json::to_value(k.direction)?,
                            })
                        })
                        .collect::<std::result::Result<Vec<_>, serde_json::Error>>()?,
                };
                let options = req.options.unwrap_or_else(|| options_input(&current.to_spec()));
                // A name that was defaulted to the old signature follows the new one.
                let name = match req.name.as_deref() {
                    Some(name) => Some(name),
                    None if current.name == current.key_signature => None,
                    None => Some(current.name.as_str()),
                };
                build_declared_spec(&current.collection, name, &keys, &options)?
            }
        };

        let existing = self
            .collection_specs(current.database_id, &current.collection, Some(id))
            .await?;
        if let Some(reason) = find_conflict(&spec, &existing) {
            return Err(AppError::Conflict(reason));
        }

        sqlx::query_as::<_, IndexDefinition>(&format!(
            r#"
            UPDATE index_definitions
            SET name = $2, key_signature = $3, keys = $4, options = $5, is_text = $6,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {INDEX_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&spec.name)
        .bind(&spec.key_signature)
        .bind(Json(&spec.keys))
        .bind(Json(&spec.options))
        .bind(spec.is_text())
        .fetch_optional(&self.db)
        .await
        .map_err(|e| conflict_on_unique(e, "Index name or definition already exists"))?
        .ok_or_else(|| AppError::NotFound("Index not found".to_string()))
    }

    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM index_definitions WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("Index not found".to_string()));
        }
        Ok(())
    }

    /// Declared specs for the given collections. Every requested collection
    /// gets an entry, empty when nothing is declared on it.
    pub async fn specs_for_collections(
        &self,
        database_id: Uuid,
        collections: &[String],
    ) -> Result<BTreeMap<String, Vec<IndexSpec>>> {
        let rows = sqlx::query_as::<_, IndexDefinition>(&format!(
            r#"
            SELECT {INDEX_COLUMNS} FROM index_definitions
            WHERE database_id = $1 AND collection = ANY($2)
            ORDER BY created_at
            "#
        ))
        .bind(database_id)
        .bind(collections)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let mut declared: BTreeMap<String, Vec<IndexSpec>> = collections
            .iter()
            .map(|c| (c.clone(), Vec::new()))
            .collect();
        for row in rows {
            declared.entry(row.collection.clone()).or_default().push(row.to_spec());
        }
        Ok(declared)
    }

    /// Every declared spec of a database, grouped by collection.
    pub async fn specs_for_database(&self, database_id: Uuid) -> Result<BTreeMap<String, Vec<IndexSpec>>> {
        let collections = self.declared_collections(database_id).await?;
        self.specs_for_collections(database_id, &collections).await
    }

    /// Collections that have at least one declared index.
    pub async fn declared_collections(&self, database_id: Uuid) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT collection FROM index_definitions WHERE database_id = $1 ORDER BY collection",
        )
        .bind(database_id)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Store an already validated and signed spec.
    pub async fn insert_spec(&self, database_id: Uuid, spec: &IndexSpec) -> Result<IndexDefinition> {
        sqlx::query_as::<_, IndexDefinition>(&format!(
            r#"
            INSERT INTO index_definitions
                (database_id, collection, name, key_signature, keys, options, is_text)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {INDEX_COLUMNS}
            "#
        ))
        .bind(database_id)
        .bind(&spec.collection)
        .bind(&spec.name)
        .bind(&spec.key_signature)
        .bind(Json(&spec.keys))
        .bind(Json(&spec.options))
        .bind(spec.is_text())
        .fetch_one(&self.db)
        .await
        .map_err(|e| conflict_on_unique(e, "Index name or definition already exists"))
    }

    async fn collection_specs(
        &self,
        database_id: Uuid,
        collection: &str,
        exclude: Option<Uuid>,
    ) -> Result<Vec<IndexSpec>> {
        let rows = sqlx::query_as::<_, IndexDefinition>(&format!(
            r#"
            SELECT {INDEX_COLUMNS} FROM index_definitions
            WHERE database_id = $1 AND collection = $2 AND ($3::UUID IS NULL OR id <> $3)
            "#
        ))
        .bind(database_id)
        .bind(collection)
        .bind(exclude)
        .fetch_all(&self.db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows.iter().map(IndexDefinition::to_spec).collect())
    }
}

/// Turn stored options back into the submitted shape so they can be
/// revalidated together with new keys.
fn options_input(spec: &IndexSpec) -> IndexOptionsInput {
    let options = &spec.options;
    IndexOptionsInput {
        expire_after_seconds: options.expire_after_seconds,
        is_unique: Some(options.is_unique),
        collation: options.collation.as_ref().map(|c| CollationInput {
            locale: Some(c.locale.clone()),
            strength: c.strength,
            case_level: c.case_level,
            case_first: c.case_first.clone(),
            numeric_ordering: c.numeric_ordering,
        }),
        default_language: options.default_language.clone(),
        weights: (!options.weights.is_empty()).then(|| {
            options
                .weights
                .iter()
                .map(|(field, weight)| (field.clone(), i64::from(*weight)))
                .collect()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declared(collection: &str, name: Option<&str>, keys: serde_json::Value, options: serde_json::Value) -> IndexSpec {
        let keys: Vec<IndexKeyInput> = serde_json::from_value(keys).unwrap();
        let options: IndexOptionsInput = serde_json::from_value(options).unwrap();
        build_declared_spec(collection, name, &keys, &options).unwrap()
    }

    #[test]
    fn test_no_conflict_on_empty_collection() {
        let spec = declared("users", None, json!([{"field": "email", "value": 1}]), json!({}));
        assert_eq!(find_conflict(&spec, &[]), None);
    }

    #[test]
    fn test_conflict_on_same_name() {
        let a = declared("users", Some("by_email"), json!([{"field": "email", "value": 1}]), json!({}));
        let b = declared("users", Some("by_email"), json!([{"field": "login", "value": 1}]), json!({}));
        let reason = find_conflict(&b, &[a]).unwrap();
        assert!(reason.contains("by_email"));
    }

    #[test]
    fn test_conflict_on_same_signature_with_other_name() {
        let a = declared("users", Some("one"), json!([{"field": "email", "value": -1}]), json!({}));
        let b = declared("users", Some("two"), json!([{"field": "email", "value": -1}]), json!({}));
        assert!(find_conflict(&b, &[a]).is_some());
    }

    #[test]
    fn test_conflict_on_second_unique_over_same_fields() {
        let a = declared(
            "users",
            None,
            json!([{"field": "a", "value": 1}, {"field": "b", "value": 1}]),
            json!({"is_unique": true}),
        );
        let b = declared(
            "users",
            None,
            json!([{"field": "b", "value": -1}, {"field": "a", "value": 1}]),
            json!({"is_unique": true}),
        );
        assert_ne!(a.key_signature, b.key_signature);
        assert!(find_conflict(&b, &[a.clone()]).unwrap().contains("Unique"));

        let non_unique = declared(
            "users",
            None,
            json!([{"field": "b", "value": -1}, {"field": "a", "value": 1}]),
            json!({}),
        );
        assert_eq!(find_conflict(&non_unique, &[a]), None);
    }

    #[test]
    fn test_options_input_revalidates_to_same_signature() {
        let spec = declared(
            "posts",
            None,
            json!([{"field": "title", "value": "text"}]),
            json!({"default_language": "en", "weights": {"title": 5}}),
        );
        let keys: Vec<IndexKeyInput> = spec
            .keys
            .iter()
            .map(|k| IndexKeyInput {
                field: k.field.clone(),
                value: serde_json::to_value(k.direction).unwrap(),
            })
            .collect();
        let rebuilt = build_declared_spec("posts", None, &keys, &options_input(&spec)).unwrap();
        assert_eq!(rebuilt.key_signature, spec.key_signature);
    }

    #[test]
    fn test_collection_name_rules() {
        assert!(validate_collection_name("orders").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("a$b").is_err());
        assert!(validate_collection_name("system.users").is_err());
    }
}
