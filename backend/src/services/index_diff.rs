//! Declared-vs-live index diff.
//!
//! Matching is by key signature only: an index whose name differs but whose
//! signature is equal counts as present. Each live index satisfies at most
//! one declared index.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;
use utoipa::ToSchema;

use crate::models::index_spec::{IndexSpec, LiveIndexSnapshot};

/// Outcome of comparing one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct DiffResult {
    /// Declared but absent from the live collection.
    pub missing: Vec<IndexSpec>,
    /// Declared and present (the declared definitions are reported).
    pub matched: Vec<IndexSpec>,
    /// Present on the live collection but not declared.
    pub redundant: Vec<IndexSpec>,
}

/// Per-collection diff as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CollectionDiff {
    pub collection: String,
    pub missing: Vec<IndexSpec>,
    pub matched: Vec<IndexSpec>,
    pub redundant: Vec<IndexSpec>,
}

impl From<(String, DiffResult)> for CollectionDiff {
    fn from((collection, diff): (String, DiffResult)) -> Self {
        Self {
            collection,
            missing: diff.missing,
            matched: diff.matched,
            redundant: diff.redundant,
        }
    }
}

/// Diff one collection.
pub fn diff_collection(declared: &[IndexSpec], live: &[LiveIndexSnapshot]) -> DiffResult {
    let mut by_signature: HashMap<&str, VecDeque<usize>> = HashMap::with_capacity(live.len());
    for (pos, snapshot) in live.iter().enumerate() {
        by_signature
            .entry(snapshot.key_signature.as_str())
            .or_default()
            .push_back(pos);
    }

    let mut consumed = vec![false; live.len()];
    let mut result = DiffResult::default();

    for spec in declared {
        let hit = by_signature
            .get_mut(spec.key_signature.as_str())
            .and_then(VecDeque::pop_front);
        match hit {
            Some(pos) => {
                consumed[pos] = true;
                result.matched.push(spec.clone());
            }
            None => result.missing.push(spec.clone()),
        }
    }

    result.redundant = live
        .iter()
        .zip(consumed)
        .filter(|(_, used)| !used)
        .map(|(snapshot, _)| snapshot.clone())
        .collect();

    result
}

/// Diff every collection present on either side.
pub fn diff(
    declared: &BTreeMap<String, Vec<IndexSpec>>,
    live: &BTreeMap<String, Vec<LiveIndexSnapshot>>,
) -> BTreeMap<String, DiffResult> {
    declared
        .keys()
        .chain(live.keys())
        .map(|collection| {
            let d = declared.get(collection).map(Vec::as_slice).unwrap_or_default();
            let l = live.get(collection).map(Vec::as_slice).unwrap_or_default();
            (collection.clone(), diff_collection(d, l))
        })
        .collect()
}

/// Group index specs by their collection, preserving input order.
pub fn group_by_collection<I>(specs: I) -> BTreeMap<String, Vec<IndexSpec>>
where
    I: IntoIterator<Item = IndexSpec>,
{
    let mut grouped: BTreeMap<String, Vec<IndexSpec>> = BTreeMap::new();
    for spec in specs {
        grouped.entry(spec.collection.clone()).or_default().push(spec);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::index_spec::{IndexKey, IndexOptions, KeyDirection};
    use crate::services::index_signature::assign_signature;

    fn spec(collection: &str, name: &str, keys: &[(&str, KeyDirection)], unique: bool) -> IndexSpec {
        let mut s = IndexSpec {
            collection: collection.into(),
            name: name.into(),
            keys: keys.iter().map(|(f, d)| IndexKey::new(*f, *d)).collect(),
            options: IndexOptions {
                is_unique: unique,
                ..Default::default()
            },
            key_signature: String::new(),
        };
        assign_signature(&mut s);
        s
    }

    fn text_spec(name: &str, language: &str) -> IndexSpec {
        let mut s = spec("posts", name, &[("title", KeyDirection::Text)], false);
        s.options.default_language = Some(language.into());
        s.options.weights.insert("title".into(), 1);
        assign_signature(&mut s);
        s
    }

    #[test]
    fn test_missing_when_live_is_empty() {
        let declared = vec![spec("users", "", &[("email", KeyDirection::Ascending)], true)];
        let result = diff_collection(&declared, &[]);
        assert_eq!(result.missing.len(), 1);
        assert!(result.matched.is_empty());
        assert!(result.redundant.is_empty());
    }

    #[test]
    fn test_match_ignores_names() {
        let declared = vec![text_spec("my_search", "en")];
        let live = vec![text_spec("title_text", "en")];
        let result = diff_collection(&declared, &live);
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.matched[0].key_signature, live[0].key_signature);
        assert!(result.missing.is_empty());
        assert!(result.redundant.is_empty());
    }

    #[test]
    fn test_one_live_index_matches_one_declared() {
        let a = spec("c", "first", &[("a", KeyDirection::Ascending)], false);
        let b = spec("c", "second", &[("a", KeyDirection::Ascending)], false);
        let live = vec![spec("c", "a_1", &[("a", KeyDirection::Ascending)], false)];
        let result = diff_collection(&[a, b], &live);
        assert_eq!(result.matched.len(), 1);
        assert_eq!(result.missing.len(), 1);
        assert_eq!(result.missing[0].name, "second");
    }

    #[test]
    fn test_redundant_keeps_live_order() {
        let live = vec![
            spec("c", "z", &[("z", KeyDirection::Ascending)], false),
            spec("c", "a", &[("a", KeyDirection::Ascending)], false),
            spec("c", "m", &[("m", KeyDirection::Descending)], false),
        ];
        let declared = vec![spec("c", "", &[("a", KeyDirection::Ascending)], false)];
        let result = diff_collection(&declared, &live);
        let names: Vec<_> = result.redundant.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["z", "m"]);
    }

    #[test]
    fn test_completeness_and_idempotence() {
        let declared = vec![
            spec("c", "", &[("a", KeyDirection::Ascending)], false),
            spec("c", "", &[("b", KeyDirection::Descending)], true),
            text_spec("t", "none"),
        ];
        let live = vec![
            spec("c", "x", &[("b", KeyDirection::Descending)], true),
            spec("c", "y", &[("q", KeyDirection::Ascending)], false),
        ];
        let result = diff_collection(&declared, &live);
        assert_eq!(result.matched.len() + result.missing.len(), declared.len());
        assert_eq!(result.matched.len() + result.redundant.len(), live.len());

        let same = diff_collection(&declared, &declared);
        assert!(same.missing.is_empty());
        assert!(same.redundant.is_empty());
        assert_eq!(same.matched, declared);
    }

    #[test]
    fn test_diff_covers_union_of_collections() {
        let declared = group_by_collection(vec![
            spec("users", "", &[("email", KeyDirection::Ascending)], true),
            spec("orders", "", &[("user_id", KeyDirection::Ascending)], false),
        ]);
        let live = group_by_collection(vec![spec(
            "logs",
            "ts_1",
            &[("ts", KeyDirection::Descending)],
            false,
        )]);
        let result = diff(&declared, &live);
        assert_eq!(
            result.keys().cloned().collect::<Vec<_>>(),
            vec!["logs", "orders", "users"]
        );
        assert_eq!(result["logs"].redundant.len(), 1);
        assert_eq!(result["users"].missing.len(), 1);

        let api: Vec<CollectionDiff> = result.into_iter().map(CollectionDiff::from).collect();
        assert_eq!(api[0].collection, "logs");
    }
}
