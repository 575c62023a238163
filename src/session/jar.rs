//! Rotating cookie jar with JSON-file persistence.
//!
//! The provider rotates its auth token in the `Set-Cookie` headers of every
//! response. reqwest's built-in jar applies such updates but gives no
//! read-modify-write visibility, so the session keeps its own name→value
//! map under a mutex, merges every response into it, and re-sends the full
//! `Cookie` header on each request.
//!
//! The on-disk format (input and output) is a flat JSON object mapping
//! cookie name to value. No attributes; the provider domain is implicit.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Mutex;

use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::{debug, warn};

use super::error::SessionError;
use crate::fsio;

/// Thread-safe cookie store for one authenticated session.
///
/// Jar mutation and cookie-file I/O are serialized by two dedicated locks:
/// a request merging rotated tokens never blocks on disk, and two persist
/// calls never interleave their temp-file writes.
pub struct RotatingJar {
    cookies: Mutex<BTreeMap<String, String>>,
    file_lock: Mutex<()>,
}

impl RotatingJar {
    /// Creates an empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cookies: Mutex::new(BTreeMap::new()),
            file_lock: Mutex::new(()),
        }
    }

    /// Loads a jar from a JSON cookie file (name → value object).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CookieIo`] when the file cannot be read and
    /// [`SessionError::CookieFormat`] when it is not a string→string object.
    pub fn from_file(path: &Path) -> Result<Self, SessionError> {
        let bytes = std::fs::read(path).map_err(|source| SessionError::CookieIo {
            path: path.to_path_buf(),
            source,
        })?;
        let map: BTreeMap<String, String> =
            serde_json::from_slice(&bytes).map_err(|e| SessionError::CookieFormat {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        debug!(count = map.len(), "loaded cookie jar");
        Ok(Self {
            cookies: Mutex::new(map),
            file_lock: Mutex::new(()),
        })
    }

    /// Builds the `Cookie` request header value, or `None` when empty.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.lock_cookies();
        if cookies.is_empty() {
            return None;
        }
        let header = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        Some(header)
    }

    /// Merges every `Set-Cookie` header of a response into the jar.
    ///
    /// Each header is parsed as `name=value[; attributes]`; only the leading
    /// pair is kept, attributes are ignored (the domain is implicit). Values
    /// are stored byte-for-byte as received so round-trips are identical.
    ///
    /// Returns the number of cookies that were inserted or changed.
    pub fn merge_from_headers(&self, headers: &HeaderMap) -> usize {
        let mut rotated = 0;
        let mut cookies = self.lock_cookies();
        for header in headers.get_all(SET_COOKIE) {
            let Ok(raw) = header.to_str() else {
                warn!("ignoring non-UTF-8 Set-Cookie header");
                continue;
            };
            let Some((name, value)) = parse_set_cookie(raw) else {
                warn!(header = %raw, "ignoring malformed Set-Cookie header");
                continue;
            };
            let changed = cookies.get(name).map(String::as_str) != Some(value);
            if changed {
                cookies.insert(name.to_string(), value.to_string());
                rotated += 1;
                debug!(cookie = %name, "rotated cookie");
            }
        }
        rotated
    }

    /// Returns the value of a single cookie, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.lock_cookies().get(name).cloned()
    }

    /// Copies the current name→value map.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock_cookies().clone()
    }

    /// Number of cookies in the jar.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_cookies().len()
    }

    /// True when the jar holds no cookies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_cookies().is_empty()
    }

    /// Persists the jar to `path` as a JSON object via atomic rename.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CookieIo`] on write failure; callers treat
    /// this as fatal to the job.
    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        let snapshot = self.snapshot();
        let _guard = self
            .file_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        fsio::write_json_atomic(path, &snapshot).map_err(|source| SessionError::CookieIo {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), count = snapshot.len(), "save: persisted cookie jar");
        Ok(())
    }

    fn lock_cookies(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.cookies
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for RotatingJar {
    fn default() -> Self {
        Self::new()
    }
}

// Cookie values are credentials; Debug shows names only.
impl fmt::Debug for RotatingJar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cookies = self.lock_cookies();
        f.debug_struct("RotatingJar")
            .field("names", &cookies.keys().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

/// Parses the leading `name=value` pair of a `Set-Cookie` header value.
fn parse_set_cookie(raw: &str) -> Option<(&str, &str)> {
    let pair = raw.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name, value))
}
