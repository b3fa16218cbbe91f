//! Live index inspector.
//!
//! Reads the index catalog of a target database and rebuilds every entry as
//! an [`IndexSpec`] in the same canonical shape used for declared indexes.
//! Reads are all-or-nothing: a failure on any collection discards the
//! results gathered so far.

use std::collections::BTreeMap;
use std::sync::Arc;

use mongodb::bson::{Bson, Document};

use crate::models::index_spec::{
    Collation, IndexKey, IndexOptions, IndexSpec, KeyDirection, LiveIndexSnapshot,
};
use crate::services::index_signature::{signature, TEXT_INDEX_FIELDS};
use crate::services::mongo_catalog::{CatalogConnector, CatalogError, IndexCatalog};

/// Live indexes of a database, keyed by collection.
pub type LiveIndexes = BTreeMap<String, Vec<LiveIndexSnapshot>>;

const DEFAULT_INDEX_NAME: &str = "_id_";

pub struct LiveIndexInspector {
    connector: Arc<dyn CatalogConnector>,
}

impl LiveIndexInspector {
    pub fn new(connector: Arc<dyn CatalogConnector>) -> Self {
        Self { connector }
    }

    /// Inspect the given collections. Every requested collection gets an
    /// entry, empty when the collection does not exist.
    pub async fn inspect(
        &self,
        uri: &str,
        db_name: &str,
        collections: &[String],
    ) -> Result<LiveIndexes, CatalogError> {
        let catalog = self.connect(uri, db_name).await?;
        read_collections(catalog.as_ref(), collections).await
    }

    /// Inspect every collection of the database.
    pub async fn inspect_database(
        &self,
        uri: &str,
        db_name: &str,
    ) -> Result<LiveIndexes, CatalogError> {
        let catalog = self.connect(uri, db_name).await?;
        let collections = catalog.list_collection_names().await.map_err(|e| {
            tracing::error!(db_name, error = %e, "Failed to list collections");
            e
        })?;
        read_collections(catalog.as_ref(), &collections).await
    }

    async fn connect(
        &self,
        uri: &str,
        db_name: &str,
    ) -> Result<Arc<dyn IndexCatalog>, CatalogError> {
        self.connector.connect(uri, db_name).await.map_err(|e| {
            tracing::error!(db_name, error = %e, "Failed to connect to target database");
            e
        })
    }
}

async fn read_collections(
    catalog: &dyn IndexCatalog,
    collections: &[String],
) -> Result<LiveIndexes, CatalogError> {
    let mut live = LiveIndexes::new();
    for collection in collections {
        let documents = catalog.list_index_documents(collection).await.map_err(|e| {
            tracing::error!(collection = %collection, error = %e, "Failed to list indexes");
            e
        })?;
        let snapshots = documents
            .iter()
            .filter_map(|doc| snapshot_from_document(collection, doc))
            .collect();
        live.insert(collection.clone(), snapshots);
    }
    Ok(live)
}

fn bson_number(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

fn key_direction(value: &Bson) -> Option<KeyDirection> {
    match value {
        Bson::String(s) if s == "text" => Some(KeyDirection::Text),
        other => match bson_number(other)? {
            1 => Some(KeyDirection::Ascending),
            -1 => Some(KeyDirection::Descending),
            _ => None,
        },
    }
}

fn collation_from_document(doc: &Document) -> Option<Collation> {
    let locale = doc.get_str("locale").ok()?;
    if locale.is_empty() || locale == "simple" {
        return None;
    }
    Some(Collation {
        locale: locale.to_string(),
        strength: doc.get("strength").and_then(bson_number).map(|n| n as i32),
        case_level: doc.get_bool("caseLevel").ok(),
        case_first: doc.get_str("caseFirst").ok().map(str::to_string),
        numeric_ordering: doc.get_bool("numericOrdering").ok(),
    })
}

/// Rebuild one catalog entry as an index snapshot.
///
/// Returns `None` for the default `_id` index and for indexes whose key
/// types cannot be expressed (`hashed`, `2dsphere`, ...); those never take
/// part in a diff.
pub fn snapshot_from_document(collection: &str, doc: &Document) -> Option<LiveIndexSnapshot> {
    let name = doc.get_str("name").unwrap_or_default().to_string();
    let key_doc = doc.get_document("key").ok()?;

    if name == DEFAULT_INDEX_NAME || (key_doc.len() == 1 && key_doc.contains_key("_id")) {
        return None;
    }

    let mut keys = Vec::with_capacity(key_doc.len());
    let mut is_text = false;
    let mut text_position = None;
    for (field, value) in key_doc {
        if TEXT_INDEX_FIELDS.contains(&field.as_str()) {
            if field.as_str() == TEXT_INDEX_FIELDS[0] {
                text_position = Some(keys.len());
            }
            is_text = true;
            continue;
        }
        match key_direction(value) {
            Some(direction) => {
                is_text |= direction == KeyDirection::Text;
                keys.push(IndexKey::new(field.clone(), direction));
            }
            None => {
                tracing::warn!(
                    collection,
                    index = %name,
                    field = %field,
                    value = %value,
                    "Skipping index with unsupported key type"
                );
                return None;
            }
        }
    }

    let mut options = IndexOptions {
        expire_after_seconds: doc.get("expireAfterSeconds").and_then(bson_number),
        is_unique: doc.get_bool("unique").unwrap_or(false),
        collation: doc.get_document("collation").ok().and_then(collation_from_document),
        ..Default::default()
    };

    if is_text {
        options.default_language = doc.get_str("default_language").ok().map(str::to_string);
        if let Ok(weights) = doc.get_document("weights") {
            for (field, weight) in weights {
                if let Some(weight) = bson_number(weight) {
                    options.weights.insert(field.clone(), weight as i32);
                }
            }
        }
        // The catalog stores text fields only in `weights`; they sit where `_fts` does.
        keys.retain(|k| k.direction != KeyDirection::Text);
        let at = text_position.unwrap_or(keys.len()).min(keys.len());
        let tail = keys.split_off(at);
        keys.extend(
            options
                .weights
                .keys()
                .map(|field| IndexKey::new(field.clone(), KeyDirection::Text)),
        );
        keys.extend(tail);
    }

    let mut snapshot = IndexSpec {
        collection: collection.to_string(),
        name,
        keys,
        options,
        key_signature: String::new(),
    };

    let mut sorted = snapshot.clone();
    sorted.keys.sort_by(|a, b| a.field.cmp(&b.field));
    snapshot.key_signature = signature(&sorted);

    Some(snapshot)
}
