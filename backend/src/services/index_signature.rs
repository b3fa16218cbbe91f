//! Index signature canonicalizer and declared-index validation.
//!
//! The signature is the identity of an index: two indexes with the same
//! keys (in the same order) and the same identity-relevant options share a
//! signature regardless of their names. Key order is significant; callers
//! that need order independence sort the keys before calling [`signature`].

use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::models::index_spec::{
    Collation, IndexKey, IndexKeyInput, IndexOptions, IndexOptionsInput, IndexSpec, KeyDirection,
};

/// Physical key names a text index stores in the live catalog.
pub const TEXT_INDEX_FIELDS: [&str; 2] = ["_fts", "_ftsx"];

/// Collation strength applied when a collation omits it (the server default).
pub const DEFAULT_COLLATION_STRENGTH: i32 = 3;

/// Language stored on text indexes that do not declare one.
pub const DEFAULT_TEXT_LANGUAGE: &str = "none";

const MAX_TEXT_WEIGHT: i64 = 99_999;

/// Compute the canonical signature of an index.
pub fn signature(spec: &IndexSpec) -> String {
    if spec.keys.is_empty() {
        return String::new();
    }

    let options = &spec.options;
    let mut sig = String::new();

    if spec.is_text() {
        sig.push_str("text_");
        if let Some(language) = &options.default_language {
            let _ = write!(sig, "default_language_{}_", language);
        }
        for (field, weight) in &options.weights {
            let _ = write!(sig, "weights_{}_{}_", field, weight);
        }
    } else {
        for key in &spec.keys {
            if TEXT_INDEX_FIELDS.contains(&key.field.as_str()) {
                continue;
            }
            let _ = write!(sig, "{}_{}_", key.field, key.direction);
        }
    }

    if let Some(collation) = options.collation.as_ref().filter(|c| !c.locale.is_empty()) {
        let _ = write!(sig, "collation_locale_{}_", collation.locale);
        if let Some(strength) = collation.strength {
            let _ = write!(sig, "strength_{}_", strength);
        }
    }

    if options.is_unique {
        sig.push_str("unique_");
    }

    if let Some(ttl) = options.expire_after_seconds {
        let _ = write!(sig, "expireAfterSeconds_{}", ttl);
    }

    sig
}

/// Fill in `key_signature`, and `name` when it is empty.
pub fn assign_signature(spec: &mut IndexSpec) {
    spec.key_signature = signature(spec);
    if spec.name.trim().is_empty() {
        spec.name = spec.key_signature.clone();
    }
}

// ── Validation ──

/// Rejection of a malformed index definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexValidationError {
    #[error("index must declare at least one key")]
    EmptyKeys,

    #[error("key field '{0}' is declared more than once")]
    DuplicateKeyField(String),

    #[error("key field must not be empty")]
    EmptyKeyField,

    #[error("key '{field}' has value {value}, expected 1, -1 or \"text\"")]
    InvalidKeyValue { field: String, value: String },

    #[error("an index may carry at most one text key")]
    MultipleTextKeys,

    #[error("expire_after_seconds must be >= 0, got {0}")]
    NegativeTtl(i64),

    #[error("TTL indexes must be single-field")]
    TtlCompound,

    #[error("text indexes do not support collation")]
    TextCollation,

    #[error("collation requires a locale")]
    MissingCollationLocale,

    #[error("collation strength must be between 1 and 5, got {0}")]
    InvalidCollationStrength(i32),

    #[error("weight field '{0}' is not a text key of this index")]
    WeightWithoutTextKey(String),

    #[error("weight for '{field}' must be between 1 and 99999, got {weight}")]
    InvalidWeight { field: String, weight: i64 },

    #[error("default_language is only valid on text indexes")]
    LanguageWithoutTextKey,

    #[error("default_language '{0}' must be a two-letter ISO-639-1 code or \"none\"")]
    InvalidLanguage(String),
}

impl IndexValidationError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyKeys => "empty_keys",
            Self::DuplicateKeyField(_) => "duplicate_key_field",
            Self::EmptyKeyField => "empty_key_field",
            Self::InvalidKeyValue { .. } => "invalid_key_value",
            Self::MultipleTextKeys => "multiple_text_keys",
            Self::NegativeTtl(_) => "negative_ttl",
            Self::TtlCompound => "ttl_compound",
            Self::TextCollation => "text_collation",
            Self::MissingCollationLocale => "missing_collation_locale",
            Self::InvalidCollationStrength(_) => "invalid_collation_strength",
            Self::WeightWithoutTextKey(_) => "weight_without_text_key",
            Self::InvalidWeight { .. } => "invalid_weight",
            Self::LanguageWithoutTextKey => "language_without_text_key",
            Self::InvalidLanguage(_) => "invalid_language",
        }
    }
}

fn language_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(none|[a-z]{2})$").unwrap())
}

/// Validate a submitted index definition and normalize its options.
///
/// Normalization gives text indexes a language (`none`) and an explicit
/// weight of 1 for each text key, and collations an explicit strength, so
/// that declared definitions compare equal to what the server reports.
pub fn validate_declared(
    keys: &[IndexKeyInput],
    options: &IndexOptionsInput,
) -> Result<(Vec<IndexKey>, IndexOptions), IndexValidationError> {
    if keys.is_empty() {
        return Err(IndexValidationError::EmptyKeys);
    }

    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(keys.len());
    for key in keys {
        let field = key.field.trim();
        if field.is_empty() {
            return Err(IndexValidationError::EmptyKeyField);
        }
        if !seen.insert(field) {
            return Err(IndexValidationError::DuplicateKeyField(field.to_string()));
        }
        let direction =
            KeyDirection::from_json(&key.value).ok_or_else(|| IndexValidationError::InvalidKeyValue {
                field: field.to_string(),
                value: key.value.to_string(),
            })?;
        parsed.push(IndexKey::new(field, direction));
    }

    let text_fields: Vec<&str> = parsed
        .iter()
        .filter(|k| k.direction == KeyDirection::Text)
        .map(|k| k.field.as_str())
        .collect();
    if text_fields.len() > 1 {
        return Err(IndexValidationError::MultipleTextKeys);
    }
    let is_text = !text_fields.is_empty();

    if let Some(ttl) = options.expire_after_seconds {
        if ttl < 0 {
            return Err(IndexValidationError::NegativeTtl(ttl));
        }
        if parsed.len() > 1 {
            return Err(IndexValidationError::TtlCompound);
        }
    }

    let collation = match &options.collation {
        None => None,
        Some(_) if is_text => return Err(IndexValidationError::TextCollation),
        Some(input) => {
            let locale = input
                .locale
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .ok_or(IndexValidationError::MissingCollationLocale)?;
            let strength = input.strength.unwrap_or(DEFAULT_COLLATION_STRENGTH);
            if !(1..=5).contains(&strength) {
                return Err(IndexValidationError::InvalidCollationStrength(strength));
            }
            Some(Collation {
                locale: locale.to_string(),
                strength: Some(strength),
                case_level: input.case_level,
                case_first: input.case_first.clone(),
                numeric_ordering: input.numeric_ordering,
            })
        }
    };

    let mut weights = BTreeMap::new();
    for (field, weight) in options.weights.iter().flatten() {
        if !text_fields.contains(&field.as_str()) {
            return Err(IndexValidationError::WeightWithoutTextKey(field.clone()));
        }
        if !(1..=MAX_TEXT_WEIGHT).contains(weight) {
            return Err(IndexValidationError::InvalidWeight {
                field: field.clone(),
                weight: *weight,
            });
        }
        weights.insert(field.clone(), *weight as i32);
    }

    let default_language = match options.default_language.as_deref().map(str::trim) {
        Some(language) if !language.is_empty() => {
            if !is_text {
                return Err(IndexValidationError::LanguageWithoutTextKey);
            }
            if !language_regex().is_match(language) {
                return Err(IndexValidationError::InvalidLanguage(language.to_string()));
            }
            Some(language.to_string())
        }
        _ if is_text => Some(DEFAULT_TEXT_LANGUAGE.to_string()),
        _ => None,
    };

    for field in &text_fields {
        weights.entry((*field).to_string()).or_insert(1);
    }

    Ok((
        parsed,
        IndexOptions {
            expire_after_seconds: options.expire_after_seconds,
            is_unique: options.is_unique.unwrap_or(false),
            collation,
            default_language,
            weights,
        },
    ))
}

/// Validate, normalize and sign a submitted index definition.
pub fn build_declared_spec(
    collection: &str,
    name: Option<&str>,
    keys: &[IndexKeyInput],
    options: &IndexOptionsInput,
) -> Result<IndexSpec, IndexValidationError> {
    let (keys, options) = validate_declared(keys, options)?;
    let mut spec = IndexSpec {
        collection: collection.to_string(),
        name: name.unwrap_or_default().trim().to_string(),
        keys,
        options,
        key_signature: String::new(),
    };
    assign_signature(&mut spec);
    Ok(spec)
}

/// Check the structural invariants of a declared index on an already
/// built spec, such as one read back from a live database.
pub fn check_invariants(spec: &IndexSpec) -> Result<(), IndexValidationError> {
    if spec.keys.is_empty() {
        return Err(IndexValidationError::EmptyKeys);
    }
    let text_keys = spec
        .keys
        .iter()
        .filter(|k| k.direction == KeyDirection::Text)
        .count();
    if text_keys > 1 {
        return Err(IndexValidationError::MultipleTextKeys);
    }
    if let Some(ttl) = spec.options.expire_after_seconds {
        if ttl < 0 {
            return Err(IndexValidationError::NegativeTtl(ttl));
        }
        if spec.keys.len() > 1 {
            return Err(IndexValidationError::TtlCompound);
        }
    }
    if text_keys > 0 && spec.options.collation.is_some() {
        return Err(IndexValidationError::TextCollation);
    }
    Ok(())
}
