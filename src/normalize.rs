//! Tolerant normalization of completed-task payloads
//!
//! The service's completed payloads drift: collections arrive as ordered
//! lists or as keyed mappings, citation references as bare strings or as
//! `{url, relevance}` objects, field names vary per feature, and numeric
//! scores may simply be absent. This module holds the shared helpers the
//! feature normalizers build on.
//!
//! Tolerance has a hard edge: a payload missing every recognized shape is a
//! contract violation by the service and raises
//! [`Error::MalformedResponse`](crate::error::Error::MalformedResponse) —
//! it is never silently normalized to an empty result.

use crate::error::{Error, Result};
use crate::types::CitationReference;
use serde_json::Value;

/// Normalize a collection delivered as a list or a keyed mapping
///
/// Arrays keep their order; mappings yield their values in the map's stable
/// iteration order (no explicit order is given, so the key order stands in
/// for one). Any other shape is not a collection.
pub fn collection_values(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Array(items) => Some(items.clone()),
        Value::Object(map) => Some(map.values().cloned().collect()),
        _ => None,
    }
}

/// Find the first present field among aliased names and normalize it as a
/// collection, or fail loudly
///
/// `aliases` covers field-name drift (e.g. `keywords` vs `keyword_data`).
pub fn require_collection(value: &Value, aliases: &[&str], context: &str) -> Result<Vec<Value>> {
    for name in aliases {
        if let Some(field) = value.get(name) {
            if let Some(items) = collection_values(field) {
                return Ok(items);
            }
        }
    }
    Err(Error::MalformedResponse {
        context: format!("{context}: none of {aliases:?} holds a list or mapping"),
    })
}

/// Normalize a citation reference from either wire shape
///
/// Bare strings become a reference with no relevance; objects must carry a
/// string `url`. `url` is always present in the output, `relevance` optional.
pub fn citation_reference(value: &Value) -> Option<CitationReference> {
    match value {
        Value::String(url) => Some(CitationReference {
            url: url.clone(),
            relevance: None,
        }),
        Value::Object(map) => {
            let url = map.get("url")?.as_str()?.to_string();
            let relevance = map.get("relevance").and_then(Value::as_f64);
            Some(CitationReference { url, relevance })
        }
        _ => None,
    }
}

/// Normalize a list of citation references, dropping entries of no known shape
pub fn citation_references(value: Option<&Value>) -> Vec<CitationReference> {
    let Some(items) = value.and_then(collection_values) else {
        return Vec::new();
    };
    items.iter().filter_map(citation_reference).collect()
}

/// Optional numeric score: absent stays absent, never coerced to zero
pub fn optional_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

/// Optional unsigned count
pub fn optional_u64(value: Option<&Value>) -> Option<u64> {
    value.and_then(Value::as_u64)
}

/// String field, tolerating absence
pub fn optional_str(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// String field under any of several aliased names
pub fn str_field(value: &Value, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .find_map(|name| value.get(name).and_then(Value::as_str))
        .map(str::to_string)
}
