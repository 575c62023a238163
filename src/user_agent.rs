//! Shared User-Agent string for all HTTP traffic.
//!
//! Single source for project URL and UA format so discovery and download
//! traffic stay consistent and easy to update (good citizenship; RFC 9308).

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/nicksrandall/skillshelf";

/// Default User-Agent sent on every request (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("skillshelf/{version} (library-archival-tool; +{PROJECT_UA_URL})")
}
