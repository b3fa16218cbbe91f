//! Target database access: connect, list, drop and create indexes.
//!
//! Everything that talks to a managed MongoDB deployment goes through the
//! [`IndexCatalog`] and [`CatalogConnector`] traits so the inspector and the
//! sync job can be exercised without a live server. Every operation is
//! bounded by a timeout; short catalog calls and index builds use different
//! bounds.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::options::ClientOptions;
use mongodb::{Client as MongoClient, Database};
use thiserror::Error;

use crate::config::Config;
use crate::models::index_spec::{IndexSpec, KeyDirection};

/// Server error code for a missing collection.
const NAMESPACE_NOT_FOUND: i32 = 26;
/// Server error code for a missing index.
const INDEX_NOT_FOUND: i32 = 27;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Cannot connect to database: {0}")]
    Connection(String),

    #[error("Cannot get indexes from collection '{collection}': {message}")]
    Read { collection: String, message: String },

    #[error("Cannot change indexes on collection '{collection}': {message}")]
    Apply { collection: String, message: String },

    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },
}

/// Index catalog of one target database.
#[async_trait]
pub trait IndexCatalog: Send + Sync {
    async fn list_collection_names(&self) -> Result<Vec<String>, CatalogError>;

    /// Raw catalog entries of a collection; a missing collection has none.
    async fn list_index_documents(&self, collection: &str) -> Result<Vec<Document>, CatalogError>;

    /// Drop an index by name. Dropping an index that is already gone succeeds.
    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), CatalogError>;

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: Vec<Document>,
    ) -> Result<(), CatalogError>;
}

/// Opens a verified (pinged) catalog handle for a connection URI.
#[async_trait]
pub trait CatalogConnector: Send + Sync {
    async fn connect(&self, uri: &str, db_name: &str)
        -> Result<Arc<dyn IndexCatalog>, CatalogError>;
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogTimeouts {
    pub connect: Duration,
    pub request: Duration,
    pub bulk: Duration,
}

impl CatalogTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.mongodb_connect_timeout(),
            request: config.mongodb_request_timeout(),
            bulk: config.mongodb_bulk_timeout(),
        }
    }
}

impl Default for CatalogTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(20),
            request: Duration::from_secs(30),
            bulk: Duration::from_secs(600),
        }
    }
}

async fn bounded<T, F>(operation: &str, after: Duration, fut: F) -> Result<T, CatalogError>
where
    F: Future<Output = Result<T, CatalogError>>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| CatalogError::Timeout {
            operation: operation.to_string(),
            after,
        })?
}

fn command_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(cmd) => Some(cmd.code),
        _ => None,
    }
}

// ── MongoDB implementation ──

pub struct MongoConnector {
    timeouts: CatalogTimeouts,
}

impl MongoConnector {
    pub fn new(timeouts: CatalogTimeouts) -> Self {
        Self { timeouts }
    }
}

#[async_trait]
impl CatalogConnector for MongoConnector {
    async fn connect(
        &self,
        uri: &str,
        db_name: &str,
    ) -> Result<Arc<dyn IndexCatalog>, CatalogError> {
        let timeout = self.timeouts.connect;
        let db = bounded("connect", timeout, async {
            let mut options = ClientOptions::parse(uri)
                .await
                .map_err(|e| CatalogError::Connection(e.to_string()))?;
            options.connect_timeout = Some(timeout);
            options.server_selection_timeout = Some(timeout);
            let client = MongoClient::with_options(options)
                .map_err(|e| CatalogError::Connection(e.to_string()))?;
            let db = client.database(db_name);
            db.run_command(doc! { "ping": 1 })
                .await
                .map_err(|e| CatalogError::Connection(e.to_string()))?;
            Ok(db)
        })
        .await?;

        Ok(Arc::new(MongoCatalog {
            db,
            timeouts: self.timeouts,
        }))
    }
}

pub struct MongoCatalog {
    db: Database,
    timeouts: CatalogTimeouts,
}

#[async_trait]
impl IndexCatalog for MongoCatalog {
    async fn list_collection_names(&self) -> Result<Vec<String>, CatalogError> {
        bounded("listCollections", self.timeouts.request, async {
            self.db
                .list_collection_names()
                .await
                .map_err(|e| CatalogError::Read {
                    collection: "*".to_string(),
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn list_index_documents(&self, collection: &str) -> Result<Vec<Document>, CatalogError> {
        bounded("listIndexes", self.timeouts.request, async {
            let read_error = |e: MongoError| CatalogError::Read {
                collection: collection.to_string(),
                message: e.to_string(),
            };
            let cursor = match self
                .db
                .run_cursor_command(doc! { "listIndexes": collection })
                .await
            {
                Ok(cursor) => cursor,
                Err(e) if command_code(&e) == Some(NAMESPACE_NOT_FOUND) => return Ok(Vec::new()),
                Err(e) => return Err(read_error(e)),
            };
            cursor.try_collect::<Vec<Document>>().await.map_err(read_error)
        })
        .await
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), CatalogError> {
        bounded("dropIndexes", self.timeouts.request, async {
            match self
                .db
                .run_command(doc! { "dropIndexes": collection, "index": name })
                .await
            {
                Ok(_) => Ok(()),
                Err(e)
                    if matches!(
                        command_code(&e),
                        Some(INDEX_NOT_FOUND) | Some(NAMESPACE_NOT_FOUND)
                    ) =>
                {
                    tracing::debug!(collection, index = name, "Index already absent");
                    Ok(())
                }
                Err(e) => Err(CatalogError::Apply {
                    collection: collection.to_string(),
                    message: e.to_string(),
                }),
            }
        })
        .await
    }

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: Vec<Document>,
    ) -> Result<(), CatalogError> {
        if indexes.is_empty() {
            return Ok(());
        }
        bounded("createIndexes", self.timeouts.bulk, async {
            self.db
                .run_command(doc! { "createIndexes": collection, "indexes": indexes })
                .await
                .map(|_| ())
                .map_err(|e| CatalogError::Apply {
                    collection: collection.to_string(),
                    message: e.to_string(),
                })
        })
        .await
    }
}

/// Build the `createIndexes` entry for an index.
pub fn index_document(spec: &IndexSpec) -> Document {
    let mut key = Document::new();
    for k in &spec.keys {
        let value = match k.direction {
            KeyDirection::Ascending => Bson::Int32(1),
            KeyDirection::Descending => Bson::Int32(-1),
            KeyDirection::Text => Bson::String("text".to_string()),
        };
        key.insert(k.field.clone(), value);
    }

    let options = &spec.options;
    let mut entry = doc! { "key": key, "name": spec.name.clone() };
    if options.is_unique {
        entry.insert("unique", true);
    }
    if let Some(ttl) = options.expire_after_seconds {
        entry.insert("expireAfterSeconds", ttl);
    }
    if let Some(collation) = options.collation.as_ref().filter(|c| !c.locale.is_empty()) {
        let mut c = doc! { "locale": collation.locale.clone() };
        if let Some(strength) = collation.strength {
            c.insert("strength", strength);
        }
        if let Some(case_level) = collation.case_level {
            c.insert("caseLevel", case_level);
        }
        if let Some(case_first) = &collation.case_first {
            c.insert("caseFirst", case_first.clone());
        }
        if let Some(numeric) = collation.numeric_ordering {
            c.insert("numericOrdering", numeric);
        }
        entry.insert("collation", c);
    }
    if spec.is_text() {
        if let Some(language) = &options.default_language {
            entry.insert("default_language", language.clone());
        }
        if !options.weights.is_empty() {
            let weights: Document = options
                .weights
                .iter()
                .map(|(field, weight)| (field.clone(), Bson::Int32(*weight)))
                .collect();
            entry.insert("weights", weights);
        }
    }
    entry
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory catalog used by inspector and sync tests.

    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeCatalog {
        pub indexes: Mutex<BTreeMap<String, Vec<Document>>>,
        pub drop_attempts: Mutex<Vec<(String, String)>>,
        pub created: Mutex<Vec<(String, Document)>>,
        pub fail_drop_of: Option<String>,
        pub fail_list_of: Option<String>,
        pub fail_create_on: Option<String>,
    }

    impl FakeCatalog {
        pub fn with_indexes(collections: Vec<(&str, Vec<Document>)>) -> Self {
            let indexes = collections
                .into_iter()
                .map(|(c, docs)| (c.to_string(), docs))
                .collect();
            Self {
                indexes: Mutex::new(indexes),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl IndexCatalog for FakeCatalog {
        async fn list_collection_names(&self) -> Result<Vec<String>, CatalogError> {
            Ok(self.indexes.lock().unwrap().keys().cloned().collect())
        }

        async fn list_index_documents(
            &self,
            collection: &str,
        ) -> Result<Vec<Document>, CatalogError> {
            if self.fail_list_of.as_deref() == Some(collection) {
                return Err(CatalogError::Read {
                    collection: collection.to_string(),
                    message: "not authorized".to_string(),
                });
            }
            Ok(self
                .indexes
                .lock()
                .unwrap()
                .get(collection)
                .cloned()
                .unwrap_or_default())
        }

        async fn drop_index(&self, collection: &str, name: &str) -> Result<(), CatalogError> {
            self.drop_attempts
                .lock()
                .unwrap()
                .push((collection.to_string(), name.to_string()));
            if self.fail_drop_of.as_deref() == Some(name) {
                return Err(CatalogError::Apply {
                    collection: collection.to_string(),
                    message: format!("cannot drop {name}"),
                });
            }
            if let Some(docs) = self.indexes.lock().unwrap().get_mut(collection) {
                docs.retain(|d| d.get_str("name").ok() != Some(name));
            }
            Ok(())
        }

        async fn create_indexes(
            &self,
            collection: &str,
            indexes: Vec<Document>,
        ) -> Result<(), CatalogError> {
            if self.fail_create_on.as_deref() == Some(collection) {
                return Err(CatalogError::Apply {
                    collection: collection.to_string(),
                    message: "index build failed".to_string(),
                });
            }
            let mut created = self.created.lock().unwrap();
            let mut all = self.indexes.lock().unwrap();
            for index in indexes {
                created.push((collection.to_string(), index.clone()));
                all.entry(collection.to_string()).or_default().push(index);
            }
            Ok(())
        }
    }

    /// Connector that hands out one shared catalog, or refuses to connect.
    pub struct FakeConnector {
        pub catalog: Option<Arc<FakeCatalog>>,
    }

    impl FakeConnector {
        pub fn new(catalog: Arc<FakeCatalog>) -> Self {
            Self {
                catalog: Some(catalog),
            }
        }

        pub fn unreachable() -> Self {
            Self { catalog: None }
        }
    }

    #[async_trait]
    impl CatalogConnector for FakeConnector {
        async fn connect(
            &self,
            _uri: &str,
            _db_name: &str,
        ) -> Result<Arc<dyn IndexCatalog>, CatalogError> {
            match &self.catalog {
                Some(catalog) => Ok(catalog.clone() as Arc<dyn IndexCatalog>),
                None => Err(CatalogError::Connection("connection refused".to_string())),
            }
        }
    }
}
