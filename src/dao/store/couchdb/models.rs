use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DOC_SEPARATOR: &str = "::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    #[serde(default)]
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
}

/// One CouchDB document holding the subtree of a `{root}/{phase}` path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchTreeDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub value: Value,
}

/// Where a store path lives inside CouchDB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocLocation<'a> {
    /// Below a single document: its id and the segments inside its tree.
    Document { doc_id: String, inner: Vec<&'a str> },
    /// Above documents: every document id starting with `prefix`.
    Prefix { prefix: String },
}

/// Locate `path`: the first two segments pick the document.
pub fn locate(path: &str) -> DocLocation<'_> {
    let segments = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>();
    match segments.as_slice() {
        [root, phase, inner @ ..] => DocLocation::Document {
            doc_id: format!("{root}{DOC_SEPARATOR}{phase}"),
            inner: inner.to_vec(),
        },
        [root] => DocLocation::Prefix {
            prefix: format!("{root}{DOC_SEPARATOR}"),
        },
        [] => DocLocation::Prefix {
            prefix: String::new(),
        },
    }
}

/// Store path covered by a document id.
pub fn doc_path(doc_id: &str) -> Option<String> {
    let (root, phase) = doc_id.split_once(DOC_SEPARATOR)?;
    Some(format!("{root}/{phase}"))
}

/// Render a `last_seq` value (string on CouchDB 2+, number before) for the next `since`.
pub fn seq_param(value: &Value) -> String {
    match value {
        Value::String(seq) => seq.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deep_paths_map_to_a_document() {
        assert_eq!(
            locate("submissions/A/current/p1"),
            DocLocation::Document {
                doc_id: "submissions::A".into(),
                inner: vec!["current", "p1"],
            }
        );
        assert_eq!(
            locate("totals/B"),
            DocLocation::Document {
                doc_id: "totals::B".into(),
                inner: vec![],
            }
        );
    }

    #[test]
    fn shallow_paths_map_to_a_prefix() {
        assert_eq!(
            locate("history"),
            DocLocation::Prefix {
                prefix: "history::".into()
            }
        );
    }

    #[test]
    fn doc_ids_map_back_to_paths() {
        assert_eq!(doc_path("editOverlay::B").as_deref(), Some("editOverlay/B"));
        assert!(doc_path("_design/x").is_none());
    }

    #[test]
    fn seq_accepts_strings_and_numbers() {
        assert_eq!(seq_param(&json!("12-abc")), "12-abc");
        assert_eq!(seq_param(&json!(42)), "42");
    }
}
