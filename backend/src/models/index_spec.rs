//! Index specification model: declared and live index definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sqlx::types::Json;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Direction of one index key: `1`, `-1` or the text-index marker `"text"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyDirection {
    Ascending,
    Descending,
    Text,
}

impl KeyDirection {
    /// Parse a raw JSON key value. Only `1`, `-1` and `"text"` are accepted.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(1) => Some(Self::Ascending),
                Some(-1) => Some(Self::Descending),
                _ => None,
            },
            serde_json::Value::String(s) if s == "text" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ascending => "1",
            Self::Descending => "-1",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for KeyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for KeyDirection {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Ascending => serializer.serialize_i32(1),
            Self::Descending => serializer.serialize_i32(-1),
            Self::Text => serializer.serialize_str("text"),
        }
    }
}

impl<'de> Deserialize<'de> for KeyDirection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid index key value {raw}, expected 1, -1 or \"text\""
            ))
        })
    }
}

/// One `(field, direction)` pair of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IndexKey {
    pub field: String,
    #[serde(rename = "value")]
    #[schema(value_type = Object)]
    pub direction: KeyDirection,
}

impl IndexKey {
    pub fn new(field: impl Into<String>, direction: KeyDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Collation {
    pub locale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_level: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_first: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_ordering: Option<bool>,
}

/// Options that take part in index identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IndexOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_seconds: Option<i64>,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<Collation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    /// Text field weights, ordered by field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub weights: BTreeMap<String, i32>,
}

/// A declared or observed index.
///
/// `key_signature` is the identity used for matching; `name` is cosmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IndexSpec {
    pub collection: String,
    pub name: String,
    pub keys: Vec<IndexKey>,
    #[serde(default)]
    pub options: IndexOptions,
    #[serde(default)]
    pub key_signature: String,
}

impl IndexSpec {
    /// True iff any key carries the text marker.
    pub fn is_text(&self) -> bool {
        self.keys.iter().any(|k| k.direction == KeyDirection::Text)
    }

    /// Set of key field names, ignoring order and direction.
    pub fn key_fields(&self) -> BTreeSet<&str> {
        self.keys.iter().map(|k| k.field.as_str()).collect()
    }
}

/// An index reconstructed from a live collection's catalog.
pub type LiveIndexSnapshot = IndexSpec;

// ── Request-side shapes ──

/// A key as submitted by a client; the value is checked during validation.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct IndexKeyInput {
    pub field: String,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct CollationInput {
    pub locale: Option<String>,
    pub strength: Option<i32>,
    pub case_level: Option<bool>,
    pub case_first: Option<String>,
    pub numeric_ordering: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct IndexOptionsInput {
    pub expire_after_seconds: Option<i64>,
    pub is_unique: Option<bool>,
    pub collation: Option<CollationInput>,
    pub default_language: Option<String>,
    pub weights: Option<BTreeMap<String, i64>>,
}

// ── Persisted rows ──

/// A declared index row in the manager store.
#[derive(Debug, Clone, FromRow, Serialize, ToSchema)]
pub struct IndexDefinition {
    pub id: Uuid,
    pub database_id: Uuid,
    pub collection: String,
    pub name: String,
    pub key_signature: String,
    #[schema(value_type = Vec<IndexKey>)]
    pub keys: Json<Vec<IndexKey>>,
    #[schema(value_type = IndexOptions)]
    pub options: Json<IndexOptions>,
    pub is_text: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexDefinition {
    pub fn to_spec(&self) -> IndexSpec {
        IndexSpec {
            collection: self.collection.clone(),
            name: self.name.clone(),
            keys: self.keys.0.clone(),
            options: self.options.0.clone(),
            key_signature: self.key_signature.clone(),
        }
    }
}
