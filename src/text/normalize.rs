//! OCR text cleanup
//!
//! Raw OCR output from scanned drawings carries stray quotes, uneven
//! whitespace and dangling separators where a line was cut off mid-glyph.
//! `clean_text` collapses those into a stable uppercase form that the
//! classifier and normalizers operate on.

use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Matches text ending in a separator character.
static DANGLING_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r".+[\\/.\-]$").expect("valid regex"));

/// Matches a separator that sits between two alphanumerics, e.g. `A9.1`
/// or `1/2` - such a tail is real content, not a dangling fragment.
static SEPARATED_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Z0-9][\\/.\-][A-Z0-9]$").expect("valid regex"));

/// Normalize raw OCR text: uppercase, collapse whitespace runs, strip
/// surrounding quotes, and drop a single dangling trailing separator.
pub fn clean_text(raw: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let collapsed = WHITESPACE_RUN.replace_all(&upper, " ");
    let mut t = collapsed
        .trim_matches(|c: char| c == ' ' || c == '\'' || c == '"')
        .to_string();
    if DANGLING_TAIL.is_match(&t) && !SEPARATED_TAIL.is_match(&t) {
        t.pop();
    }
    t.trim().to_string()
}
