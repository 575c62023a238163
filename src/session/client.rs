//! Authenticated HTTP session with in-band token rotation.
//!
//! One [`SessionClient`] owns the process-wide reqwest client and the
//! [`RotatingJar`]. Its `get` is an atomic "(send, receive, merge-cookies)"
//! operation: every response's `Set-Cookie` headers are folded into the jar
//! before the response is handed back, so the next request always carries
//! the freshest token. Ignoring rotations invalidates the session within a
//! handful of calls.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::error::SessionError;
use super::jar::RotatingJar;
use crate::user_agent;

/// Default connect timeout for all session requests.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read timeout for all session requests.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request options for [`SessionClient::get`].
#[derive(Debug, Default, Clone)]
pub struct GetOptions {
    /// Extra request headers (name, value) pairs.
    pub headers: Vec<(String, String)>,
    /// Overrides the default read timeout.
    pub timeout: Option<Duration>,
    /// The endpoint is expected to answer JSON; an HTML body means the
    /// provider bounced the request to its login page.
    pub expect_json: bool,
}

impl GetOptions {
    /// Options for a JSON API endpoint.
    #[must_use]
    pub fn json() -> Self {
        Self {
            expect_json: true,
            ..Self::default()
        }
    }
}

/// Shared HTTP session: one client, one cookie jar, serial use.
///
/// The client itself is cheap to share (`Arc` internally); the pipeline
/// discipline of one in-flight request at a time is the caller's contract,
/// enforced by the job controller's serial loop.
#[derive(Debug)]
pub struct SessionClient {
    client: Client,
    jar: Arc<RotatingJar>,
    cookie_path: Option<PathBuf>,
    save_interval: u32,
    books_since_save: AtomicU32,
}

impl SessionClient {
    /// Creates a session over `jar`, persisting to `cookie_path` every
    /// `save_interval` completed books (and once more on flush).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Transport`]-flavored build failure only if
    /// the TLS backend cannot initialize; static configuration otherwise
    /// always builds.
    pub fn new(
        jar: Arc<RotatingJar>,
        cookie_path: Option<PathBuf>,
        save_interval: u32,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()?;
        Ok(Self {
            client,
            jar,
            cookie_path,
            save_interval: save_interval.max(1),
            books_since_save: AtomicU32::new(0),
        })
    }

    /// The session's cookie jar.
    #[must_use]
    pub fn jar(&self) -> &Arc<RotatingJar> {
        &self.jar
    }

    /// Issues a GET with current cookies and merges rotated tokens.
    ///
    /// Contract:
    /// - 2xx and non-auth 4xx: returns the response, jar already updated.
    /// - 401/403, or HTML from an endpoint marked `expect_json`: [`SessionError::AuthFailed`].
    /// - timeout / connection failure: [`SessionError::Timeout`] / [`SessionError::Transport`].
    ///
    /// # Errors
    ///
    /// See the contract above. 5xx statuses are returned as `Ok` here;
    /// typed helpers ([`Self::get_json`], [`Self::get_success`]) promote
    /// them to [`SessionError::HttpStatus`] for the retry layer.
    #[instrument(level = "debug", skip(self, opts), fields(url = %url))]
    pub async fn get(&self, url: &str, opts: &GetOptions) -> Result<Response, SessionError> {
        let mut request = self.client.get(url);
        if let Some(header) = self.jar.cookie_header() {
            request = request.header(COOKIE, header);
        }
        for (name, value) in &opts.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = opts.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SessionError::transport(url, e))?;

        // Merge-before-return is the rotation invariant: by the time any
        // caller sees this response, the jar already holds its tokens.
        let rotated = self.jar.merge_from_headers(response.headers());
        if rotated > 0 {
            debug!(rotated, "merged rotated cookies");
        }

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(SessionError::auth(url, status.as_u16()));
        }

        if opts.expect_json && is_html(&response) {
            warn!(url = %url, "JSON endpoint answered with HTML; session is deauthenticated");
            return Err(SessionError::auth(url, 0));
        }

        Ok(response)
    }

    /// GET returning the response only on 2xx; other statuses become
    /// [`SessionError::HttpStatus`] (with Retry-After captured for the
    /// retry layer). Used for chapter bodies and asset streams.
    ///
    /// # Errors
    ///
    /// Everything [`Self::get`] returns, plus `HttpStatus` on non-2xx.
    pub async fn get_success(
        &self,
        url: &str,
        opts: &GetOptions,
    ) -> Result<Response, SessionError> {
        let response = self.get(url, opts).await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            return Err(SessionError::http_status(url, status.as_u16(), retry_after));
        }
        Ok(response)
    }

    /// GET decoding a 2xx JSON body into `T`.
    ///
    /// # Errors
    ///
    /// Everything [`Self::get_success`] returns, plus
    /// [`SessionError::Decode`] when the body is not valid `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SessionError> {
        let response = self.get_success(url, &GetOptions::json()).await?;
        response.json::<T>().await.map_err(|e| SessionError::Decode {
            url: url.to_string(),
            detail: e.to_string(),
        })
    }

    /// Notes one completed book; persists the jar every `save_interval`
    /// books when a cookie path is configured.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CookieIo`] when the periodic save fails;
    /// fatal to the job, since losing rotated tokens strands the session.
    pub fn book_completed(&self) -> Result<(), SessionError> {
        let completed = self.books_since_save.fetch_add(1, Ordering::SeqCst) + 1;
        if completed >= self.save_interval {
            self.books_since_save.store(0, Ordering::SeqCst);
            self.flush_cookies()?;
        }
        Ok(())
    }

    /// Persists the jar now (graceful shutdown, end of run).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CookieIo`] on write failure.
    pub fn flush_cookies(&self) -> Result<(), SessionError> {
        if let Some(path) = &self.cookie_path {
            self.jar.save(path)?;
        }
        Ok(())
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
}
