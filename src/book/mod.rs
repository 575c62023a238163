//! Book acquisition pipeline: metadata, chapters, assets, cover.

pub mod assets;
pub mod chapter;
pub mod fetcher;
pub mod metadata;

use thiserror::Error;

pub use assets::{AssetDownloader, AssetKind, AssetReport, AssetRequest, FailedAsset};
pub use chapter::{ChapterDescriptor, ChapterDocument, ChapterManifestPage, parse_chapter};
pub use fetcher::{BookFetcher, CoverImage, FetchedBook, cover_variants};
pub use metadata::{BookMetadata, SIDECAR_FILE};

use crate::session::SessionError;

/// Errors fatal to one book (never silently skipped, never fatal to the
/// job unless the inner error is an auth failure).
#[derive(Debug, Error)]
pub enum BookError {
    /// Session-level failure after retries.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A critical payload (info JSON, chapter manifest, chapter HTML) was
    /// malformed.
    #[error("cannot parse {url}: {detail}")]
    Parse { url: String, detail: String },

    /// Staging or packaging the book failed.
    #[error(transparent)]
    Package(#[from] crate::epub::PackageError),
}

impl BookError {
    /// True when this failure invalidates the whole job.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Session(inner) if inner.is_auth())
    }

    /// Kind label for the failed-items map.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(inner) => inner.kind(),
            Self::Parse { .. } => "parse",
            Self::Package(_) => "package",
        }
    }
}
