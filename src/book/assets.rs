//! Asset downloading: chapter images and stylesheets.
//!
//! Assets are fetched serially through the shared session. A failed image
//! or stylesheet never fails the book: the failure is recorded, the file
//! is simply absent, and the packager manifests only what exists on disk.
//! Auth failures are the one exception: they abort the whole job.

use std::path::Path;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::pacing::{RetryPolicy, with_retries};
use crate::session::{GetOptions, SessionClient, SessionError};

/// What kind of asset a request is for; decides the target subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    Image,
    Stylesheet,
}

impl AssetKind {
    /// Subdirectory under `OEBPS/` for this kind.
    #[must_use]
    pub fn subdir(self) -> &'static str {
        match self {
            Self::Image => "Images",
            Self::Stylesheet => "Styles",
        }
    }
}

/// One `{url → local name}` download entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRequest {
    pub url: String,
    /// Basename inside the kind's subdirectory.
    pub local_name: String,
    pub kind: AssetKind,
}

impl AssetRequest {
    /// Path relative to `OEBPS/`, as referenced from chapters.
    #[must_use]
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.kind.subdir(), self.local_name)
    }
}

/// One asset that exhausted its retries.
#[derive(Debug, Clone)]
pub struct FailedAsset {
    pub url: String,
    pub local_name: String,
    pub error: String,
}

/// Outcome of an asset batch.
#[derive(Debug, Default)]
pub struct AssetReport {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: Vec<FailedAsset>,
}

/// Serial asset fetcher over the shared session.
pub struct AssetDownloader {
    session: std::sync::Arc<SessionClient>,
    retry: RetryPolicy,
}

impl AssetDownloader {
    #[must_use]
    pub fn new(session: std::sync::Arc<SessionClient>) -> Self {
        Self {
            session,
            retry: RetryPolicy::default(),
        }
    }

    /// Downloads every request into `oebps_dir`, one at a time.
    ///
    /// Existing files are skipped (an interrupted book resumes its asset
    /// set for free). Per-asset retries are independent; permanent
    /// failures are recorded in the report and do not fail the batch.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AuthFailed`] only; every other failure is
    /// recorded in the report.
    pub async fn download_all(
        &self,
        requests: &[AssetRequest],
        oebps_dir: &Path,
    ) -> Result<AssetReport, SessionError> {
        let mut report = AssetReport::default();

        for request in requests {
            let target = oebps_dir
                .join(request.kind.subdir())
                .join(&request.local_name);
            if target.exists() {
                report.skipped += 1;
                continue;
            }

            match self.fetch_one(request, &target).await {
                Ok(()) => report.downloaded += 1,
                Err(error) if error.is_auth() => return Err(error),
                Err(error) => {
                    warn!(
                        url = %request.url,
                        asset = %request.local_name,
                        error = %error,
                        "fail: asset exhausted retries; continuing without it"
                    );
                    report.failed.push(FailedAsset {
                        url: request.url.clone(),
                        local_name: request.local_name.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        info!(
            downloaded = report.downloaded,
            skipped = report.skipped,
            failed = report.failed.len(),
            "download: asset batch finished"
        );
        Ok(report)
    }

    async fn fetch_one(&self, request: &AssetRequest, target: &Path) -> Result<(), SessionError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SessionError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        with_retries(&self.retry, "asset", || async {
            let response = self
                .session
                .get_success(&request.url, &GetOptions::default())
                .await?;
            stream_to_file(response, target, &request.url).await
        })
        .await?;

        debug!(asset = %request.local_name, "download: asset stored");
        Ok(())
    }
}

async fn stream_to_file(
    response: reqwest::Response,
    target: &Path,
    url: &str,
) -> Result<(), SessionError> {
    let mut file = tokio::fs::File::create(target)
        .await
        .map_err(|source| SessionError::Io {
            path: target.to_path_buf(),
            source,
        })?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(target).await;
                return Err(SessionError::transport(url, e));
            }
        };
        if let Err(source) = file.write_all(&chunk).await {
            drop(file);
            let _ = tokio::fs::remove_file(target).await;
            return Err(SessionError::Io {
                path: target.to_path_buf(),
                source,
            });
        }
    }

    file.flush().await.map_err(|source| SessionError::Io {
        path: target.to_path_buf(),
        source,
    })
}
