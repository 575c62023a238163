//! Folder and file naming for the on-disk library layout.
//!
//! Topic names become Title Case folders (acronyms preserved, short
//! conjunctions lowered), book folders carry the provider id for identity,
//! and the EPUB filename encodes the build profile. The existence check in
//! this module is the authoritative "already downloaded" predicate for the
//! whole pipeline; the progress tracker is advisory only.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{EpubFormat, EpubProfile};

/// Acronyms kept fully uppercase in topic folder names.
const ACRONYMS: &[&str] = &[
    "AI", "ML", "API", "UI", "UX", "SQL", "CSS", "HTML", "JS", "AWS", "GCP",
];

/// Conjunctions and prepositions kept lowercase when not the first word.
const SMALL_WORDS: &[&str] = &[
    "and", "or", "of", "in", "on", "at", "to", "for", "the",
];

/// Characters never allowed in folder or file names.
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Suffix appended to the reader-optimized EPUB filename.
const READER_SUFFIX: &str = " (Kindle).epub";

/// Converts a raw topic name into its output folder name.
///
/// Forbidden characters and underscores become spaces, whitespace collapses,
/// and each word is title-cased except for known acronyms (uppercased) and
/// small words (lowercased when not initial).
///
/// ```
/// use skillshelf::naming::topic_folder_name;
///
/// assert_eq!(topic_folder_name("machine_learning"), "Machine Learning");
/// assert_eq!(topic_folder_name("ai_&_ml"), "AI & ML");
/// assert_eq!(topic_folder_name("state of the art"), "State of the Art");
/// ```
#[must_use]
pub fn topic_folder_name(topic: &str) -> String {
    let spaced: String = topic
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c == '_' || c.is_whitespace() {
                ' '
            } else {
                c
            }
        })
        .collect();

    let words: Vec<String> = spaced
        .split_whitespace()
        .enumerate()
        .map(|(i, word)| title_case_word(word, i == 0))
        .collect();

    words.join(" ")
}

fn title_case_word(word: &str, initial: bool) -> String {
    let upper = word.to_uppercase();
    if let Some(acronym) = ACRONYMS.iter().find(|a| **a == upper) {
        return (*acronym).to_string();
    }

    let lower = word.to_lowercase();
    if !initial && SMALL_WORDS.contains(&lower.as_str()) {
        return lower;
    }

    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Replaces forbidden characters with underscores and trims trailing dots
/// and spaces (both are invalid at the end of Windows path components).
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let replaced: String = value
        .chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    replaced.trim().trim_end_matches(['.', ' ']).to_string()
}

/// Builds the book folder name: `<sanitized-title> (<book_id>)`.
#[must_use]
pub fn book_folder_name(title: &str, book_id: &str) -> String {
    format!("{} ({})", sanitize_component(title), sanitize_component(book_id))
}

/// Builds the EPUB filename for a profile:
/// `<title> - <author>.epub`, with ` (Kindle)` inserted for the
/// reader-optimized profile.
#[must_use]
pub fn epub_file_name(title: &str, first_author: &str, profile: EpubProfile) -> String {
    let title = sanitize_component(title);
    let author = sanitize_component(first_author);
    match profile {
        EpubProfile::Standard => format!("{title} - {author}.epub"),
        EpubProfile::ReaderOptimized => format!("{title} - {author}{READER_SUFFIX}"),
    }
}

/// Authoritative on-disk existence check for a book.
///
/// A book is present iff the EPUB file for every profile of the configured
/// format exists in its folder. The author half of the filename is only
/// known after metadata download, so the check matches by profile suffix:
/// any `*.epub` that is not a reader-optimized file satisfies the standard
/// profile, and any `* (Kindle).epub` satisfies the reader-optimized one.
#[must_use]
pub fn book_is_present(book_dir: &Path, format: EpubFormat) -> bool {
    let Ok(entries) = fs::read_dir(book_dir) else {
        return false;
    };

    let mut has_standard = false;
    let mut has_reader = false;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(READER_SUFFIX) {
            has_reader = true;
        } else if name.ends_with(".epub") {
            has_standard = true;
        }
    }

    format
        .profiles()
        .iter()
        .all(|profile| match profile {
            EpubProfile::Standard => has_standard,
            EpubProfile::ReaderOptimized => has_reader,
        })
}

/// Computes the output paths for every profile of `format`.
#[must_use]
pub fn epub_paths(
    book_dir: &Path,
    title: &str,
    first_author: &str,
    format: EpubFormat,
) -> Vec<PathBuf> {
    format
        .profiles()
        .iter()
        .map(|profile| book_dir.join(epub_file_name(title, first_author, *profile)))
        .collect()
}

/// Derives the manifest filename for a topic (`<sanitized>.json`).
#[must_use]
pub fn manifest_file_name(topic: &str) -> String {
    let mut base = sanitize_component(topic).replace(' ', "_");
    if base.is_empty() {
        base.push_str("topic");
    }
    format!("{base}.json")
}
