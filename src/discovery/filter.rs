//! Content-relevance filtering of search results.
//!
//! The search API returns a lot of non-book noise for broad topics:
//! individual chapters published as standalone records, appendices,
//! sliced course units. The filter keeps English books whose metadata ties
//! them to the requested skill, and silently drops the rest (a rejection
//! is not an error).

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use super::api::SearchResult;

/// Titles that begin like a sliced-out fragment of a larger work.
#[allow(clippy::expect_used)]
static FRAGMENT_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(chapter|section|lesson|unit|module)\s")
        .expect("FRAGMENT_PREFIX: hardcoded regex is valid")
});

/// Numbered fragment markers anywhere in the title.
#[allow(clippy::expect_used)]
static FRAGMENT_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(chapter\s*\d+\s*:|part\s+(?:[1-5]|i{1,3}|iv|v)\s*:|section\s*\d+\s*:|lesson\s*\d+\s*:)",
    )
    .expect("FRAGMENT_MARKER: hardcoded regex is valid")
});

/// Back-matter words that mark a record as a fragment, matched on word
/// boundaries so titles like "The Hard Parts" survive.
#[allow(clippy::expect_used)]
static BACK_MATTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(appendix|glossary|bibliography|foreword|preface|acknowledgments|wrap-up)\b",
    )
    .expect("BACK_MATTER: hardcoded regex is valid")
});

/// Produces the topic's matching variants: the original plus the lowercased
/// name with spaces replaced by `-`, `_` and `+`.
#[must_use]
pub fn skill_variants(topic: &str) -> Vec<String> {
    let lower = topic.to_lowercase();
    vec![
        topic.to_string(),
        lower.replace(' ', "-"),
        lower.replace(' ', "_"),
        lower.replace(' ', "+"),
    ]
}

/// True for a plausibly valid numeric ISBN (10 or 13 digits after stripping
/// separators; ISBN-10 may end in `X`).
#[must_use]
pub fn is_valid_isbn(candidate: &str) -> bool {
    let cleaned: String = candidate
        .chars()
        .filter(|c| !matches!(c, '-' | ' '))
        .collect();
    match cleaned.len() {
        13 => cleaned.chars().all(|c| c.is_ascii_digit()),
        10 => {
            let (head, tail) = cleaned.split_at(9);
            head.chars().all(|c| c.is_ascii_digit())
                && tail.chars().all(|c| c.is_ascii_digit() || c == 'X' || c == 'x')
        }
        _ => false,
    }
}

/// Applies the full relevance filter to one search result.
///
/// Accept requires, in order: a book-like format, an English (or absent)
/// language tag, a minimum title length (5 with a valid ISBN, 10 without),
/// no fragment-title pattern, and either a valid ISBN or a topic field
/// matching one of the skill variants. Deduplication by book id is the
/// caller's job.
#[must_use]
pub fn accept(result: &SearchResult, topic: &str) -> bool {
    let format = result.format.as_deref().unwrap_or("").to_lowercase();
    if !matches!(format.as_str(), "book" | "ebook" | "") {
        trace!(title = %result.title, format = %format, "reject: format");
        return false;
    }

    let language = result.language.as_deref().unwrap_or("");
    if !(language.is_empty() || language.to_lowercase().starts_with("en")) {
        trace!(title = %result.title, language, "reject: language");
        return false;
    }

    let has_isbn = result.isbn.as_deref().is_some_and(is_valid_isbn);
    let min_len = if has_isbn { 5 } else { 10 };
    if result.title.chars().count() < min_len {
        trace!(title = %result.title, "reject: title too short");
        return false;
    }

    if FRAGMENT_PREFIX.is_match(&result.title)
        || FRAGMENT_MARKER.is_match(&result.title)
        || BACK_MATTER.is_match(&result.title)
    {
        trace!(title = %result.title, "reject: fragment title");
        return false;
    }

    if has_isbn {
        return true;
    }

    let variants: Vec<String> = skill_variants(topic)
        .into_iter()
        .map(|v| v.to_lowercase())
        .collect();
    let matched = result
        .topic_fields()
        .any(|field| variants.iter().any(|v| v == &field.to_lowercase()));
    if !matched {
        trace!(title = %result.title, topic, "reject: no topic match and no ISBN");
    }
    matched
}
