//! Utility functions and helpers.

pub mod http;

use unicode_segmentation::UnicodeSegmentation;

/// Collapse runs of whitespace (including non-breaking spaces) into one space.
pub fn normalize_whitespace(s: &str) -> String {
    s.split(|c: char| c.is_whitespace() || c == '\u{a0}')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trim whitespace and trailing punctuation from a display name.
pub fn clean_name(s: &str) -> String {
    normalize_whitespace(s)
        .trim_end_matches(|c: char| matches!(c, ':' | ';' | ',' | '.' | '*' | '-' | '–'))
        .trim()
        .to_string()
}

/// Canonical identity fragment for a name.
///
/// Lowercases and keeps only Unicode words joined by `-`, so case,
/// punctuation and spacing differences in the source do not change the key.
pub fn slug(s: &str) -> String {
    s.to_lowercase()
        .unicode_words()
        .map(|w| w.replace('\'', "").replace('’', ""))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Decode HTML character references in text content.
///
/// Covers the full HTML5 named set, numeric references and the legacy names
/// accepted without a trailing `;`, matching what an HTML5 parser produces.
pub fn decode_entities(s: &str) -> String {
    htmlize::unescape(s).into_owned()
}
