//! Profile stylesheets bundled into every package.
//!
//! Both are fixed assets: identical bytes across runs, embedded in the
//! binary. The reader-optimized profile adds pagination hints that dedicated
//! e-readers honor (fresh page per chapter, headings kept with their first
//! paragraph, justified body text).

use crate::config::EpubProfile;

/// Base stylesheet for the standard profile.
pub const STANDARD_CSS: &str = "\
body {
    margin: 1em;
    font-family: serif;
    line-height: 1.4;
}
h1, h2, h3, h4, h5, h6 {
    font-family: sans-serif;
    line-height: 1.2;
}
img {
    max-width: 100%;
}
pre, code {
    font-family: monospace;
    white-space: pre-wrap;
}
blockquote {
    margin-left: 1.5em;
    font-style: italic;
}
";

/// Stylesheet for the reader-optimized profile.
pub const READER_OPTIMIZED_CSS: &str = "\
body {
    margin: 0.5em;
    font-family: serif;
    line-height: 1.4;
}
h1 {
    page-break-before: always;
}
h1, h2, h3, h4, h5, h6 {
    font-family: sans-serif;
    line-height: 1.2;
    page-break-after: avoid;
}
p {
    text-align: justify;
    text-indent: 1.2em;
    widows: 2;
    orphans: 2;
    margin: 0 0 0.2em 0;
}
h1 + p, h2 + p, h3 + p, h4 + p, h5 + p, h6 + p {
    text-indent: 0;
}
img {
    max-width: 100%;
}
pre, code {
    font-family: monospace;
    white-space: pre-wrap;
    text-align: left;
    text-indent: 0;
}
blockquote {
    margin-left: 1.5em;
    font-style: italic;
}
";

/// The bundled stylesheet for a profile.
#[must_use]
pub fn profile_css(profile: EpubProfile) -> &'static str {
    match profile {
        EpubProfile::Standard => STANDARD_CSS,
        EpubProfile::ReaderOptimized => READER_OPTIMIZED_CSS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_profile_has_pagination_rules() {
        let css = profile_css(EpubProfile::ReaderOptimized);
        assert!(css.contains("page-break-before: always"));
        assert!(css.contains("page-break-after: avoid"));
        assert!(css.contains("widows: 2"));
        assert!(css.contains("orphans: 2"));
        assert!(css.contains("text-align: justify"));
        assert!(css.contains("h1 + p"));
    }

    #[test]
    fn test_standard_profile_has_no_page_breaks() {
        let css = profile_css(EpubProfile::Standard);
        assert!(!css.contains("page-break"));
    }

    #[test]
    fn test_profiles_are_fixed_assets() {
        // Identity across calls (embedded constants, not generated).
        assert_eq!(
            profile_css(EpubProfile::ReaderOptimized),
            READER_OPTIMIZED_CSS
        );
        assert_eq!(profile_css(EpubProfile::Standard), STANDARD_CSS);
    }
}
