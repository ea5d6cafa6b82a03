//! Sheet-reference normalization
//!
//! Collapses noisy OCR variants of a sheet reference (`a9.1`, `A9-1`,
//! `A91`) into the canonical `<Letter><digits>.<digits>` form used across
//! a drawing set's title blocks and callout bubbles.

use regex::Regex;
use std::sync::LazyLock;

static SHEET_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Z]+)(\d+)$").expect("valid regex"));

/// Best-effort canonicalization of a sheet-reference candidate.
///
/// Returns `None` when the token fails the reference grammar at any step;
/// callers treat that as "no canonical page reference found", not an error.
pub fn normalize_page_reference(raw: &str) -> Option<String> {
    let t: String = raw
        .trim()
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if t.len() < 2 {
        return None;
    }
    if !t.chars().any(|c| c.is_ascii_uppercase()) || !t.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let t = t.replace('-', ".");
    let mut parts = t.split('.');
    let left = parts.next().unwrap_or("");

    let Some(second) = parts.next() else {
        // No dot at all: re-insert one before the last digit of a merged
        // token like A91, otherwise hand the token back untouched.
        if t.len() >= 3
            && t.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && t.chars().skip(1).all(|c| c.is_ascii_digit())
        {
            return Some(format!("{}.{}", &t[..t.len() - 1], &t[t.len() - 1..]));
        }
        return Some(t);
    };

    let right: String = second.chars().filter(|c| c.is_ascii_digit()).collect();
    if right.is_empty() {
        return None;
    }

    Some(format!("{}.{}", trim_sheet_index(left), right))
}

/// Strip OCR-merged leading digits from a sheet index, e.g. `A83` -> `A3`.
///
/// Assumes sheet indices in the source drawing set are single-digit; when a
/// multi-digit index exceeds 9, leading digits are dropped until the value
/// fits. Tunable assumption, not a universal truth about sheet numbering.
fn trim_sheet_index(left: &str) -> String {
    let Some(caps) = SHEET_INDEX.captures(left) else {
        return left.to_string();
    };
    let prefix = &caps[1];
    let mut digits = caps[2].to_string();
    let Ok(mut n) = digits.parse::<u64>() else {
        return left.to_string();
    };
    while digits.len() > 1 && n > 9 {
        digits.remove(0);
        match digits.parse::<u64>() {
            Ok(v) => n = v,
            Err(_) => return left.to_string(),
        }
    }
    format!("{prefix}{digits}")
}
