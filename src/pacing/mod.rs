//! Request pacing and retry policy.
//!
//! Two request classes exist: `discovery` (search pagination) and
//! `download` (book boundaries). Each enforces a minimum delay since the
//! previous request of the same class; book boundaries additionally wait
//! out a session-reuse gap since the last session-impacting request.
//!
//! Retries are deliberately simple: transient failures get up to three
//! attempts with a linear `base × attempt` delay. Auth failures and client
//! errors never retry. 429 responses honor a parsed `Retry-After` value.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::session::SessionError;

/// Maximum honored Retry-After value (1 hour) to prevent excessive delays.
const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default maximum attempts per request (initial try included).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay for the linear retry backoff.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(5);

/// Request classes with independent pacing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Search API pagination.
    Discovery,
    /// Book-boundary downloads.
    Download,
}

impl RequestClass {
    fn key(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Download => "download",
        }
    }
}

/// Minimum-delay enforcement between requests of the same class.
///
/// Designed for one serial pipeline; the map keyed by class mirrors the
/// per-domain state the download engine keeps, but here the keys are the
/// two request classes plus the session-reuse marker.
#[derive(Debug)]
pub struct Pacer {
    discovery_delay: Duration,
    download_delay: Duration,
    session_reuse_delay: Duration,
    marks: DashMap<&'static str, Arc<Mutex<Option<Instant>>>>,
}

impl Pacer {
    /// Creates a pacer with the given class delays.
    #[must_use]
    pub fn new(
        discovery_delay: Duration,
        download_delay: Duration,
        session_reuse_delay: Duration,
    ) -> Self {
        Self {
            discovery_delay,
            download_delay,
            session_reuse_delay,
            marks: DashMap::new(),
        }
    }

    /// Waits until the class delay since the previous same-class request
    /// has elapsed, then stamps the class. The first request of a class
    /// proceeds immediately.
    #[instrument(level = "debug", skip(self))]
    pub async fn wait(&self, class: RequestClass) {
        let delay = match class {
            RequestClass::Discovery => self.discovery_delay,
            RequestClass::Download => self.download_delay,
        };
        self.wait_key(class.key(), delay).await;
    }

    /// Waits out the session-reuse gap before a new book touches the
    /// shared session.
    pub async fn wait_session_reuse(&self) {
        self.wait_key("session", self.session_reuse_delay).await;
    }

    /// Records that the shared session was just used (called at book
    /// boundaries, after the last request of a book).
    pub async fn touch_session(&self) {
        let state = self.state("session");
        *state.lock().await = Some(Instant::now());
    }

    async fn wait_key(&self, key: &'static str, min_delay: Duration) {
        let state = self.state(key);
        let mut last = state.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < min_delay {
                let remaining = min_delay.saturating_sub(elapsed);
                debug!(key, wait_ms = remaining.as_millis(), "pacing delay");
                tokio::time::sleep(remaining).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn state(&self, key: &'static str) -> Arc<Mutex<Option<Instant>>> {
        self.marks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}

/// Classification of a request failure for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// May succeed on retry (timeouts, resets, 5xx).
    Transient,
    /// Retrying cannot help (4xx, parse failures, local I/O).
    Permanent,
    /// Session is deauthenticated; fatal to the job, never retried.
    Auth,
    /// Server asked us to back off (429).
    RateLimited,
}

/// Classifies a session error for the retry loop.
#[must_use]
pub fn classify(error: &SessionError) -> FailureKind {
    match error {
        SessionError::AuthFailed { .. } => FailureKind::Auth,
        SessionError::Timeout { .. } | SessionError::Transport { .. } => FailureKind::Transient,
        SessionError::HttpStatus { status, .. } => match *status {
            429 => FailureKind::RateLimited,
            500..=599 => FailureKind::Transient,
            _ => FailureKind::Permanent,
        },
        SessionError::Decode { .. }
        | SessionError::Io { .. }
        | SessionError::CookieIo { .. }
        | SessionError::CookieFormat { .. } => FailureKind::Permanent,
    }
}

/// Linear-backoff retry policy (`base × attempt`).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_BASE,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with explicit attempt count and base delay.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Maximum attempts (initial try included).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry following failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// True when attempt `attempt` (1-based) may be followed by another.
    #[must_use]
    pub fn should_retry(&self, kind: FailureKind, attempt: u32) -> bool {
        match kind {
            FailureKind::Permanent | FailureKind::Auth => false,
            FailureKind::Transient | FailureKind::RateLimited => attempt < self.max_attempts,
        }
    }
}

/// Runs `op` under the retry policy, sleeping between attempts.
///
/// Rate-limited failures wait the larger of the policy delay and the
/// server's `Retry-After`. The last error is returned when attempts are
/// exhausted or the failure is not retryable.
///
/// # Errors
///
/// Returns the final [`SessionError`] from `op`.
pub async fn with_retries<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, SessionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SessionError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let kind = classify(&error);
                if !policy.should_retry(kind, attempt) {
                    return Err(error);
                }
                let mut delay = policy.delay_for(attempt);
                if kind == FailureKind::RateLimited
                    && let SessionError::HttpStatus {
                        retry_after: Some(value),
                        ..
                    } = &error
                    && let Some(server_delay) = parse_retry_after(value)
                {
                    delay = delay.max(server_delay);
                }
                warn!(
                    what,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "retry: transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Parses a Retry-After header value (integer seconds or HTTP-date).
///
/// Returns `None` for unparseable values; caps excessive values at 1 hour.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        // Date in the past: no extra wait.
        Err(_) => Some(Duration::ZERO),
    }
}

/// Clamps the requested pipeline concurrency to 1.
///
/// The provider rotates its auth token in every response; concurrent
/// in-flight requests on one session would race on the jar and
/// intermittently deauthorize the run.
#[must_use]
pub fn effective_concurrency(requested: usize) -> usize {
    if requested > 1 {
        warn!(
            requested,
            "concurrency > 1 is incompatible with the provider's token rotation; forcing 1"
        );
    }
    1
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ==================== Pacer ====================

    #[tokio::test]
    async fn test_pacer_first_request_immediate() {
        tokio::time::pause();
        let pacer = Pacer::new(
            Duration::from_millis(1500),
            Duration::from_secs(10),
            Duration::from_secs(2),
        );

        let start = Instant::now();
        pacer.wait(RequestClass::Discovery).await;
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_pacer_delays_second_request_of_same_class() {
        tokio::time::pause();
        let pacer = Pacer::new(
            Duration::from_millis(1500),
            Duration::from_secs(10),
            Duration::from_secs(2),
        );

        let start = Instant::now();
        pacer.wait(RequestClass::Discovery).await;
        pacer.wait(RequestClass::Discovery).await;
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_pacer_classes_are_independent() {
        tokio::time::pause();
        let pacer = Pacer::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
            Duration::from_secs(2),
        );

        pacer.wait(RequestClass::Discovery).await;
        let start = Instant::now();
        pacer.wait(RequestClass::Download).await;
        assert!(
            start.elapsed() < Duration::from_millis(10),
            "download class must not inherit the discovery stamp"
        );
    }

    #[tokio::test]
    async fn test_pacer_session_reuse_gap() {
        tokio::time::pause();
        let pacer = Pacer::new(
            Duration::from_millis(100),
            Duration::from_millis(100),
            Duration::from_secs(2),
        );

        pacer.touch_session().await;
        let start = Instant::now();
        pacer.wait_session_reuse().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    // ==================== Classification ====================

    #[test]
    fn test_classify_auth_failed() {
        assert_eq!(classify(&SessionError::auth("u", 401)), FailureKind::Auth);
    }

    #[test]
    fn test_classify_timeout_transient() {
        assert_eq!(
            classify(&SessionError::Timeout { url: "u".into() }),
            FailureKind::Transient
        );
    }

    #[test]
    fn test_classify_5xx_transient_4xx_permanent_429_rate_limited() {
        assert_eq!(
            classify(&SessionError::http_status("u", 503, None)),
            FailureKind::Transient
        );
        assert_eq!(
            classify(&SessionError::http_status("u", 404, None)),
            FailureKind::Permanent
        );
        assert_eq!(
            classify(&SessionError::http_status("u", 429, None)),
            FailureKind::RateLimited
        );
    }

    #[test]
    fn test_classify_decode_permanent() {
        assert_eq!(
            classify(&SessionError::Decode {
                url: "u".into(),
                detail: "d".into()
            }),
            FailureKind::Permanent
        );
    }

    // ==================== RetryPolicy ====================

    #[test]
    fn test_retry_policy_linear_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for(3), Duration::from_secs(15));
    }

    #[test]
    fn test_retry_policy_exhausts_after_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(FailureKind::Transient, 1));
        assert!(policy.should_retry(FailureKind::Transient, 2));
        assert!(!policy.should_retry(FailureKind::Transient, 3));
    }

    #[test]
    fn test_retry_policy_never_retries_auth_or_permanent() {
        let policy = RetryPolicy::default();
        assert!(!policy.should_retry(FailureKind::Auth, 1));
        assert!(!policy.should_retry(FailureKind::Permanent, 1));
    }

    #[tokio::test]
    async fn test_with_retries_succeeds_after_transient_failures() {
        tokio::time::pause();
        let policy = RetryPolicy::default();
        let mut attempts = 0;
        let result = with_retries(&policy, "test", || {
            attempts += 1;
            let fail = attempts < 3;
            async move {
                if fail {
                    Err(SessionError::http_status("u", 502, None))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_with_retries_gives_up_after_three_attempts() {
        tokio::time::pause();
        let policy = RetryPolicy::default();
        let mut attempts = 0;
        let result: Result<(), _> = with_retries(&policy, "test", || {
            attempts += 1;
            async { Err(SessionError::Timeout { url: "u".into() }) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_with_retries_does_not_retry_auth() {
        let policy = RetryPolicy::default();
        let mut attempts = 0;
        let result: Result<(), _> = with_retries(&policy, "test", || {
            attempts += 1;
            async { Err(SessionError::auth("u", 403)) }
        })
        .await;
        assert!(matches!(result, Err(SessionError::AuthFailed { .. })));
        assert_eq!(attempts, 1);
    }

    // ==================== Retry-After ====================

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
    }

    #[test]
    fn test_parse_retry_after_invalid() {
        assert_eq!(parse_retry_after("-3"), None);
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn test_parse_retry_after_caps_at_one_hour() {
        assert_eq!(parse_retry_after("7200"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_retry_after_http_date_in_past_is_zero() {
        assert_eq!(
            parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    // ==================== Concurrency guard ====================

    #[test]
    fn test_effective_concurrency_forces_one() {
        assert_eq!(effective_concurrency(1), 1);
        assert_eq!(effective_concurrency(8), 1);
    }
}
