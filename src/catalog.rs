//! Row catalog loading
//!
//! The catalog is the initial list of `(name, url)` pairs shown by the view.
//! Two JSON shapes are accepted:
//!
//! ```json
//! { "Kitten": "https://example.com/kitten.png", "Puppy": "https://example.com/puppy.jpg" }
//! ```
//!
//! ```json
//! [ { "name": "Kitten", "url": "https://example.com/kitten.png" } ]
//! ```
//!
//! Object entries are ordered by name; array entries keep their order.
//! Malformed entries are dropped with a warning. A document that cannot be
//! parsed at all is reported once and treated as an empty catalog.

use serde_json::Value;
use std::path::Path;
use url::Url;

use crate::error::{Error, Result};

/// One row definition
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Display name
    pub name: String,
    /// Source image URL
    pub url: Url,
}

/// Load a catalog file, falling back to an empty list on any failure
pub fn load_catalog(path: impl AsRef<Path>) -> Vec<CatalogEntry> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to read catalog");
            return Vec::new();
        }
    };
    parse_catalog(&contents)
}

/// Parse catalog JSON, falling back to an empty list if the document is malformed
pub fn parse_catalog(contents: &str) -> Vec<CatalogEntry> {
    match try_parse_catalog(contents) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!(error = %e, "Catalog could not be parsed, showing no rows");
            Vec::new()
        }
    }
}

/// Parse catalog JSON, surfacing document-level failures
///
/// Individual malformed entries are still dropped rather than failing the whole
/// document.
pub fn try_parse_catalog(contents: &str) -> Result<Vec<CatalogEntry>> {
    let document: Value =
        serde_json::from_str(contents).map_err(|e| Error::CatalogParse(e.to_string()))?;

    let entries = match document {
        Value::Object(map) => {
            let mut pairs: Vec<(String, Value)> = map.into_iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            pairs
                .into_iter()
                .filter_map(|(name, value)| entry_from_pair(name, &value))
                .collect::<Vec<_>>()
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| entry_from_object(idx, item))
            .collect(),
        other => {
            return Err(Error::CatalogParse(format!(
                "expected an object or array at the top level, found {}",
                json_kind(&other)
            )));
        }
    };

    tracing::info!(rows = entries.len(), "Catalog loaded");
    Ok(entries)
}

fn entry_from_pair(name: String, value: &Value) -> Option<CatalogEntry> {
    let Some(raw) = value.as_str() else {
        tracing::warn!(name = %name, "Dropping catalog entry: URL is not a string");
        return None;
    };
    build_entry(name, raw)
}

fn entry_from_object(idx: usize, item: &Value) -> Option<CatalogEntry> {
    let name = item.get("name").and_then(Value::as_str);
    let url = item.get("url").and_then(Value::as_str);
    match (name, url) {
        (Some(name), Some(url)) => build_entry(name.to_string(), url),
        _ => {
            tracing::warn!(index = idx, "Dropping catalog entry: missing name or url");
            None
        }
    }
}

fn build_entry(name: String, raw_url: &str) -> Option<CatalogEntry> {
    match Url::parse(raw_url) {
        Ok(url) => Some(CatalogEntry { name, url }),
        Err(e) => {
            tracing::warn!(name = %name, url = raw_url, error = %e, "Dropping catalog entry: invalid URL");
            None
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
