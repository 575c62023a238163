//! Search API dialects.
//!
//! Two generations of the provider's search endpoint stay supported: the
//! authenticated v1 endpoint (1-indexed pages, small result buckets) and
//! the unauthenticated v2 endpoint (0-indexed pages, up to 100 results,
//! explicit `total`/`next` signals). The v2 dialect is preferred, but v1
//! filtering differs server-side and operators may need it for
//! completeness. Dialects are trait objects so the engine stays agnostic.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::ApiVersion;
use crate::session::{CONNECT_TIMEOUT, READ_TIMEOUT, SessionClient, SessionError};
use crate::user_agent;

/// One raw search result as returned by either dialect.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    /// Provider-assigned opaque id; some records only carry an ISBN.
    #[serde(default, alias = "id")]
    pub archive_id: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Book-info URL.
    #[serde(default, alias = "web_url")]
    pub url: Option<String>,
}

impl SearchResult {
    /// The identity used for deduplication and folder naming: the archive
    /// id when present, else the ISBN.
    #[must_use]
    pub fn book_id(&self) -> Option<&str> {
        self.archive_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.isbn.as_deref().filter(|s| !s.is_empty()))
    }

    /// All topic-ish metadata fields (`subjects` and `topics`).
    pub fn topic_fields(&self) -> impl Iterator<Item = &str> {
        self.subjects
            .iter()
            .chain(self.topics.iter())
            .map(String::as_str)
    }
}

/// One page of search results, normalized across dialects.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub results: Vec<SearchResult>,
    /// Total hit count when the dialect reports one (v2).
    pub total: Option<u64>,
    /// True when the dialect says no further pages exist.
    pub last_page: bool,
}

/// A search endpoint generation.
#[async_trait]
pub trait SearchDialect: Send + Sync {
    /// Dialect label for logs.
    fn name(&self) -> &'static str;

    /// Typical number of results per page, used for page budgeting.
    fn page_size(&self) -> usize;

    /// Index of the first page (v1 is 1-indexed, v2 is 0-indexed).
    fn first_page(&self) -> u32;

    /// Fetches one page of results for a topic. Only authenticated
    /// dialects use `session`; v2 runs on its own plain client.
    async fn fetch_page(
        &self,
        session: &SessionClient,
        topic: &str,
        page: u32,
    ) -> Result<SearchPage, SessionError>;
}

/// Builds the dialect selected by configuration.
///
/// # Errors
///
/// Returns the underlying build error when the v2 dialect's plain HTTP
/// client cannot be constructed.
pub fn make_dialect(
    version: ApiVersion,
    base_url: &str,
) -> Result<Box<dyn SearchDialect>, reqwest::Error> {
    let base_url = base_url.trim_end_matches('/').to_string();
    Ok(match version {
        ApiVersion::V1 => Box::new(V1Dialect { base_url }),
        ApiVersion::V2 => Box::new(V2Dialect::new(base_url)?),
    })
}

/// Authenticated v1 search: `?q={topic}&rows=100&page={1..}`.
#[derive(Debug)]
pub struct V1Dialect {
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct V1Response {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    complete: bool,
}

#[async_trait]
impl SearchDialect for V1Dialect {
    fn name(&self) -> &'static str {
        "v1"
    }

    fn page_size(&self) -> usize {
        // The endpoint accepts rows=100 but buckets ~15 items per page.
        15
    }

    fn first_page(&self) -> u32 {
        1
    }

    async fn fetch_page(
        &self,
        session: &SessionClient,
        topic: &str,
        page: u32,
    ) -> Result<SearchPage, SessionError> {
        let url = format!(
            "{}/api/v1/search?q={}&rows=100&page={page}",
            self.base_url,
            urlencoding::encode(topic)
        );
        debug!(dialect = "v1", page, topic, "discover: fetching search page");
        let response: V1Response = session.get_json(&url).await?;
        let last_page = response.complete || response.results.is_empty();
        Ok(SearchPage {
            results: response.results,
            total: None,
            last_page,
        })
    }
}

/// Unauthenticated v2 search: `?query=*&topics={topic}&limit=100&page={0..}`.
///
/// This endpoint needs no credentials, so it runs on its own plain client
/// with no cookie jar. Keeping v2 traffic off the shared session matters:
/// the session merges every response's `Set-Cookie` into the rotating jar,
/// and search responses must never touch the authenticated state.
#[derive(Debug)]
pub struct V2Dialect {
    base_url: String,
    client: reqwest::Client,
}

impl V2Dialect {
    fn new(base_url: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self { base_url, client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, SessionError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SessionError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(SessionError::http_status(url, status.as_u16(), retry_after));
        }

        response.json::<T>().await.map_err(|e| SessionError::Decode {
            url: url.to_string(),
            detail: e.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct V2Response {
    #[serde(default)]
    results: Vec<SearchResult>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    next: Option<String>,
}

#[async_trait]
impl SearchDialect for V2Dialect {
    fn name(&self) -> &'static str {
        "v2"
    }

    fn page_size(&self) -> usize {
        100
    }

    fn first_page(&self) -> u32 {
        0
    }

    async fn fetch_page(
        &self,
        _session: &SessionClient,
        topic: &str,
        page: u32,
    ) -> Result<SearchPage, SessionError> {
        let url = format!(
            "{}/api/v2/search?query=*&topics={}&limit=100&page={page}",
            self.base_url,
            urlencoding::encode(topic)
        );
        debug!(dialect = "v2", page, topic, "discover: fetching search page");
        let response: V2Response = self.get_json(&url).await?;
        let last_page = response.next.is_none() || response.results.is_empty();
        Ok(SearchPage {
            results: response.results,
            total: response.total,
            last_page,
        })
    }
}
