//! Book acquisition: metadata, chapter manifest, chapter bodies, cover.
//!
//! One fetch produces everything the packager needs. Metadata, manifest
//! and chapter failures are fatal to the book; the cover is an image and
//! follows image rules (logged and skipped on failure).

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::BookError;
use super::assets::AssetRequest;
use super::chapter::{ChapterDescriptor, ChapterDocument, ChapterManifestPage, parse_chapter};
use super::metadata::BookMetadata;
use crate::discovery::BookRef;
use crate::pacing::{RetryPolicy, with_retries};
use crate::session::{GetOptions, SessionClient, SessionError};

/// Minimum acceptable size for an upgraded cover variant.
const MIN_COVER_BYTES: usize = 10 * 1024;

/// A downloaded cover image.
#[derive(Debug, Clone)]
pub struct CoverImage {
    /// Basename under `Images/` (`cover.<ext>`).
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Everything fetched for one book.
#[derive(Debug)]
pub struct FetchedBook {
    pub metadata: BookMetadata,
    /// Chapters in the provider's manifest order (authoritative).
    pub chapters: Vec<ChapterDocument>,
    /// Union of every chapter's remote assets, deduplicated.
    pub assets: Vec<AssetRequest>,
    pub cover: Option<CoverImage>,
}

/// Serial book fetcher over the shared session.
pub struct BookFetcher {
    session: Arc<SessionClient>,
    retry: RetryPolicy,
    base_url: String,
}

impl BookFetcher {
    #[must_use]
    pub fn new(session: Arc<SessionClient>, base_url: &str) -> Self {
        Self {
            session,
            retry: RetryPolicy::default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetches metadata, all chapters and the cover for `book`.
    ///
    /// # Errors
    ///
    /// [`BookError::Session`] for auth/transport/HTTP failures after
    /// retries; [`BookError::Parse`] for malformed critical payloads.
    #[instrument(skip(self), fields(book = %book.id))]
    pub async fn fetch_book(&self, book: &BookRef) -> Result<FetchedBook, BookError> {
        let info_url = format!("{}/api/v1/book/{}/", self.base_url, book.id);
        info!(url = %info_url, "download: fetching book info");
        let payload: Value = with_retries(&self.retry, "book info", || {
            self.session.get_json(&info_url)
        })
        .await?;
        let metadata = BookMetadata::from_payload(payload);

        let chapters_url = metadata
            .chapters_url
            .clone()
            .unwrap_or_else(|| format!("{info_url}chapter/"));
        let descriptors = self.fetch_chapter_manifest(&chapters_url).await?;
        if descriptors.is_empty() {
            return Err(BookError::Parse {
                url: chapters_url,
                detail: "chapter manifest is empty".to_string(),
            });
        }

        let mut chapters = Vec::with_capacity(descriptors.len());
        let mut assets: Vec<AssetRequest> = Vec::new();
        for descriptor in &descriptors {
            let document = self.fetch_chapter(descriptor).await?;
            for asset in &document.assets {
                if !assets
                    .iter()
                    .any(|existing| existing.local_name == asset.local_name && existing.kind == asset.kind)
                {
                    assets.push(asset.clone());
                }
            }
            chapters.push(document);
        }

        let cover = match &metadata.cover_url {
            Some(url) => self.fetch_cover(url).await?,
            None => None,
        };

        info!(
            title = %metadata.title,
            chapters = chapters.len(),
            assets = assets.len(),
            cover = cover.is_some(),
            "download: book fetched"
        );
        Ok(FetchedBook {
            metadata,
            chapters,
            assets,
            cover,
        })
    }

    /// Follows the chapter manifest's `next` links until exhausted.
    async fn fetch_chapter_manifest(
        &self,
        first_url: &str,
    ) -> Result<Vec<ChapterDescriptor>, BookError> {
        let mut descriptors = Vec::new();
        let mut next = Some(first_url.to_string());
        while let Some(url) = next {
            let page: ChapterManifestPage = with_retries(&self.retry, "chapter manifest", || {
                self.session.get_json(&url)
            })
            .await?;
            debug!(url = %url, chapters = page.results.len(), "download: manifest page");
            descriptors.extend(page.results);
            // A self-referential next link would loop forever.
            next = page.next.filter(|n| *n != url);
        }
        Ok(descriptors)
    }

    async fn fetch_chapter(
        &self,
        descriptor: &ChapterDescriptor,
    ) -> Result<ChapterDocument, BookError> {
        if descriptor.content_url.is_empty() {
            return Err(BookError::Parse {
                url: descriptor.filename.clone(),
                detail: "chapter descriptor has no content URL".to_string(),
            });
        }
        let body = with_retries(&self.retry, "chapter body", || async {
            let response = self
                .session
                .get_success(&descriptor.content_url, &GetOptions::default())
                .await?;
            response
                .text()
                .await
                .map_err(|e| SessionError::transport(&descriptor.content_url, e))
        })
        .await?;
        Ok(parse_chapter(descriptor, &body))
    }

    /// Downloads the cover, preferring a larger variant when the URL looks
    /// like a thumbnail. The first variant whose body is at least 10 KiB
    /// wins; otherwise the original is used as-is. Failures are logged,
    /// never fatal.
    ///
    /// # Errors
    ///
    /// Only [`SessionError::AuthFailed`] propagates.
    async fn fetch_cover(&self, cover_url: &str) -> Result<Option<CoverImage>, BookError> {
        let mut original: Option<Vec<u8>> = None;
        let variants = cover_variants(cover_url);
        let last = variants.len() - 1;
        for (index, variant) in variants.iter().enumerate() {
            match with_retries(&self.retry, "cover", || self.fetch_bytes(variant)).await {
                Ok(bytes) => {
                    if bytes.len() >= MIN_COVER_BYTES {
                        debug!(variant = %variant, bytes = bytes.len(), "download: cover variant accepted");
                        return Ok(Some(CoverImage {
                            file_name: cover_file_name(variant),
                            bytes,
                        }));
                    }
                    if index == last {
                        original = Some(bytes);
                    }
                }
                Err(error) if error.is_auth() => return Err(error.into()),
                Err(error) => {
                    warn!(variant = %variant, error = %error, "retry: cover variant failed");
                }
            }
        }
        // No variant was big enough; keep whatever the original returned.
        Ok(original.map(|bytes| CoverImage {
            file_name: cover_file_name(cover_url),
            bytes,
        }))
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SessionError> {
        let response = self.session.get_success(url, &GetOptions::default()).await?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| SessionError::transport(url, e))
    }
}

/// Candidate cover URLs, most preferred first, original always last.
#[must_use]
pub fn cover_variants(url: &str) -> Vec<String> {
    let mut variants = Vec::new();
    if let Ok(parsed) = Url::parse(url)
        && let Some(upgraded) = upgraded_width(&parsed)
    {
        variants.push(upgraded);
    }
    if url.contains("/small/") {
        variants.push(url.replace("/small/", "/large/"));
    }
    if !variants.contains(&url.to_string()) {
        variants.push(url.to_string());
    }
    variants
}

/// Rewrites a small `w=` width query parameter up to 800.
fn upgraded_width(url: &Url) -> Option<String> {
    let mut found_small = false;
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            if key == "w" && value.parse::<u32>().is_ok_and(|n| n < 800) {
                found_small = true;
                ("w".to_string(), "800".to_string())
            } else {
                (key.into_owned(), value.into_owned())
            }
        })
        .collect();
    if !found_small {
        return None;
    }
    let mut upgraded = url.clone();
    upgraded.query_pairs_mut().clear().extend_pairs(pairs);
    Some(upgraded.to_string())
}

fn cover_file_name(url: &str) -> String {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    let extension = path
        .rsplit('.')
        .next()
        .map(str::to_lowercase)
        .filter(|ext| matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "gif"))
        .unwrap_or_else(|| "jpg".to_string());
    format!("cover.{extension}")
}
