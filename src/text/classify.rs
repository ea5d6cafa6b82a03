//! Construction-text classifier
//!
//! Precision-oriented filter deciding whether an OCR fragment is a
//! plausible drawing label (room tag, dimension, abbreviation, word label)
//! or noise from hatching, grid lines and partial glyphs. Tuned for
//! construction-drawing conventions; precision is favored over recall, so
//! some valid short tokens will not survive it.

use regex::Regex;
use std::sync::LazyLock;

/// Characters that may appear in a drawing label.
static ALLOWED_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^[A-Za-z0-9."'/()\s-]+$"#).expect("valid regex"));

/// Token-level patterns, checked in order. Any single match accepts the
/// whole fragment.
static TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^[A-Z]{3,}$",                  // word labels: CORRIDOR, SHELL
        r"^(UP|DN|NO|ID|LV|EL|TYP|RM)$", // common plan abbreviations
        r"^[A-Z]+\d+[A-Z]?$",            // tagged members: W1, W12A
        r"^[A-Z]+\d+(\.\d+)?$",          // sheet-style refs: A3.1, B12.2
        r"^\d{2,4}$",                    // room numbers: 101, 1203
        r#"^\d+(\.\d+)?["']?$"#,         // dimensions: 12, 12.5, 12.5"
        r#"^\d+/\d+["']?$"#,             // fractions: 1/2", 3/4
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Heuristic acceptance test for cleaned OCR text.
///
/// Accepts when any whitespace token of length >= 2 matches one of the
/// construction patterns; otherwise falls back to accepting whole-word
/// labels where every token is alphabetic and at least 3 characters.
pub fn is_construction_text(text: &str) -> bool {
    let t = text.trim();
    if t.len() < 2 {
        return false;
    }
    if !ALLOWED_CHARS.is_match(t) {
        return false;
    }

    let tokens: Vec<&str> = t.split_whitespace().collect();

    let hit = tokens
        .iter()
        .filter(|tok| tok.len() >= 2)
        .any(|tok| TOKEN_PATTERNS.iter().any(|p| p.is_match(tok)));
    if hit {
        return true;
    }

    tokens
        .iter()
        .all(|tok| tok.len() >= 3 && tok.chars().all(|c| c.is_alphabetic()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_all_caps_word() {
        assert!(is_construction_text("CORRIDOR"));
    }

    #[test]
    fn test_rejects_too_short() {
        assert!(!is_construction_text("a"));
        assert!(!is_construction_text(""));
    }

    #[test]
    fn test_accepts_room_number() {
        assert!(is_construction_text("101"));
    }

    #[test]
    fn test_all_alpha_fallback() {
        // No token matches a construction pattern, but every token is an
        // alphabetic word of length >= 3, so the fallback accepts.
        assert!(is_construction_text("the cat sat"));
        assert!(!is_construction_text("the cat is"));
    }

    #[test]
    fn test_accepts_tagged_member_and_sheet_ref() {
        assert!(is_construction_text("W12A"));
        assert!(is_construction_text("A3.1"));
    }

    #[test]
    fn test_accepts_dimension_and_fraction() {
        assert!(is_construction_text("12.5\""));
        assert!(is_construction_text("1/2\""));
    }

    #[test]
    fn test_accepts_two_letter_abbreviation() {
        assert!(is_construction_text("UP"));
        assert!(is_construction_text("DN"));
    }

    #[test]
    fn test_rejects_disallowed_characters() {
        assert!(!is_construction_text("ROOM #101"));
        assert!(!is_construction_text("50%"));
    }

    #[test]
    fn test_rejects_symbol_noise() {
        assert!(!is_construction_text("(("));
        assert!(!is_construction_text("--"));
    }
}
