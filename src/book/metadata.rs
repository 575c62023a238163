//! Book metadata derived from the provider's book-info payload.
//!
//! The raw payload is kept alongside the derived fields and persisted as a
//! `metadata.json` sidecar in the book's output folder, so nothing the API
//! said is lost even when this tool does not model it.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fsio;

/// Sidecar filename inside the book folder.
pub const SIDECAR_FILE: &str = "metadata.json";

/// Derived book metadata plus the raw API payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookMetadata {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub rights: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    /// URL of the chapter manifest for this book.
    #[serde(default)]
    pub chapters_url: Option<String>,
    /// The provider payload, verbatim.
    #[serde(default)]
    pub raw: Value,
}

impl BookMetadata {
    /// Derives metadata from a book-info payload.
    ///
    /// Name-bearing fields tolerate both plain strings and `{"name": …}`
    /// objects; anything unrecognized stays available through `raw`.
    #[must_use]
    pub fn from_payload(payload: Value) -> Self {
        let title = payload
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or("Untitled")
            .to_string();
        let authors = name_list(payload.get("authors"));
        let publisher = name_list(payload.get("publishers"))
            .into_iter()
            .next()
            .or_else(|| {
                payload
                    .get("publisher")
                    .and_then(Value::as_str)
                    .map(ToString::to_string)
            });
        let isbn = string_field(&payload, "isbn").or_else(|| string_field(&payload, "identifier"));
        let description = string_field(&payload, "description");
        let subjects = {
            let mut subjects = name_list(payload.get("subjects"));
            subjects.extend(name_list(payload.get("topics")));
            subjects.dedup();
            subjects
        };
        let rights = string_field(&payload, "rights");
        let release_date = string_field(&payload, "issued").or_else(|| string_field(&payload, "release_date"));
        let cover_url = string_field(&payload, "cover");
        let chapters_url = string_field(&payload, "chapters");

        Self {
            title,
            authors,
            publisher,
            isbn,
            description,
            subjects,
            rights,
            release_date,
            cover_url,
            chapters_url,
            raw: payload,
        }
    }

    /// First author, or `"Unknown"` for the filename pattern.
    #[must_use]
    pub fn first_author(&self) -> &str {
        self.authors
            .first()
            .map_or("Unknown", String::as_str)
    }

    /// Writes the sidecar file into the book folder.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn write_sidecar(&self, book_dir: &Path) -> std::io::Result<()> {
        fsio::write_json_atomic(&book_dir.join(SIDECAR_FILE), self)
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Extracts a list of names from `["a", {"name": "b"}]`-shaped arrays.
fn name_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("name")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            _ => None,
        })
        .filter(|s| !s.is_empty())
        .collect()
}
