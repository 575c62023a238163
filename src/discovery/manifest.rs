//! Per-topic manifest files.
//!
//! Discovery writes one manifest per topic; the download phase reads them
//! back. A manifest is never mutated in place and never partially written:
//! the atomic write leaves it either complete or absent.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fsio;
use crate::naming;

/// Errors reading or writing topic manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {path} is not well-formed: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One discovered book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRef {
    pub title: String,
    /// Opaque provider id (identity key).
    pub id: String,
    /// Canonical book-info URL.
    pub url: String,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub format: String,
}

/// The persisted result of discovering one topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicManifest {
    pub skill_name: String,
    pub discovery_timestamp: DateTime<Utc>,
    pub total_books: u64,
    pub books: Vec<BookRef>,
}

impl TopicManifest {
    /// Creates a manifest stamped now.
    #[must_use]
    pub fn new(skill_name: impl Into<String>, books: Vec<BookRef>) -> Self {
        Self {
            skill_name: skill_name.into(),
            discovery_timestamp: Utc::now(),
            total_books: books.len() as u64,
            books,
        }
    }

    /// Writes the manifest into `dir`, filename derived from the topic
    /// name. Returns the written path.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] on write failure.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, ManifestError> {
        let path = dir.join(naming::manifest_file_name(&self.skill_name));
        fsio::write_json_atomic(&path, self).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Loads a single manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] when unreadable and
    /// [`ManifestError::Format`] when not valid manifest JSON.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ManifestError::Format {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads every `*.json` manifest in `dir`, sorted by ascending
    /// `total_books` so fast wins come first and the ETA stabilizes early.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Io`] when the directory cannot be listed;
    /// individual malformed files propagate as [`ManifestError::Format`].
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, ManifestError> {
        let entries = std::fs::read_dir(dir).map_err(|source| ManifestError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut manifests = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ManifestError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                manifests.push(Self::load(&path)?);
            }
        }
        manifests.sort_by_key(|m| m.total_books);
        Ok(manifests)
    }
}
