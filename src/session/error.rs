//! Error types for the authenticated session.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur on session HTTP traffic and cookie persistence.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is no longer authenticated: 401/403, or a JSON endpoint
    /// answered with HTML (the provider's login page). Fatal to the job.
    #[error(
        "[AUTH] authentication failed for {url} (HTTP {status})\n  Suggestion: export fresh cookies from a logged-in browser session and re-run"
    )]
    AuthFailed {
        /// The URL that signalled deauthentication.
        url: String,
        /// HTTP status (401/403), or 0 for an HTML body on a JSON endpoint.
        status: u16,
    },

    /// Network-level error (DNS, connection reset, TLS).
    #[error("network error requesting {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout { url: String },

    /// Non-auth HTTP error response surfaced by a typed fetch helper.
    #[error("HTTP {status} requesting {url}")]
    HttpStatus {
        url: String,
        status: u16,
        /// The Retry-After header value, if present (429/503 responses).
        retry_after: Option<String>,
    },

    /// Response body could not be decoded as the expected JSON shape.
    #[error("cannot decode response from {url}: {detail}")]
    Decode { url: String, detail: String },

    /// File system error while writing a downloaded body.
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cookie file read/write error. Fatal to the job on write.
    #[error("cookie file error at {path}: {source}")]
    CookieIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Cookie file is not a JSON object of string values.
    #[error("cookie file {path} is not a name→value JSON object: {detail}")]
    CookieFormat { path: PathBuf, detail: String },
}

impl SessionError {
    /// Creates a transport error, promoting reqwest timeouts to [`Self::Timeout`].
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Transport { url, source }
        }
    }

    /// Creates an auth failure for an explicit status code.
    pub fn auth(url: impl Into<String>, status: u16) -> Self {
        Self::AuthFailed {
            url: url.into(),
            status,
        }
    }

    /// Creates an HTTP status error with an optional Retry-After value.
    pub fn http_status(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// True when this error invalidates the whole job, not just one book.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthFailed { .. })
    }

    /// Short machine-friendly kind label used in the failed-items map.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthFailed { .. } => "auth_failed",
            Self::Transport { .. } | Self::Timeout { .. } => "transport",
            Self::HttpStatus { .. } => "http_status",
            Self::Decode { .. } => "parse",
            Self::Io { .. } => "io",
            Self::CookieIo { .. } | Self::CookieFormat { .. } => "cookie_io",
        }
    }
}
