//! Shared text normalization and comparison utilities
//!
//! Whitespace handling used by the title pipeline plus the two fuzzy
//! similarity measures the adoption matcher blends together.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static MULTI_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());

/// Collapse runs of two or more whitespace characters into a single space and trim.
///
/// Idempotent: `collapse_whitespace(collapse_whitespace(s)) == collapse_whitespace(s)`.
pub fn collapse_whitespace(s: &str) -> String {
    MULTI_WHITESPACE.replace_all(s, " ").trim().to_string()
}

/// Full-string similarity in `0.0..=1.0` (indel based, like a classic `ratio`).
///
/// Empty input on either side scores 0.
pub fn ratio(s1: &str, s2: &str) -> f64 {
    use rapidfuzz::distance::indel;

    if s1.is_empty() || s2.is_empty() {
        return 0.0;
    }

    indel::normalized_similarity(s1.chars(), s2.chars())
}

/// Best similarity of the shorter string against every same-length window
/// of the longer one, in `0.0..=1.0`.
///
/// Rewards file names that contain the catalog title plus extra noise.
pub fn partial_ratio(s1: &str, s2: &str) -> f64 {
    use rapidfuzz::distance::indel;

    if s1.is_empty() || s2.is_empty() {
        return 0.0;
    }

    let a: Vec<char> = s1.chars().collect();
    let b: Vec<char> = s2.chars().collect();
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    if shorter.len() == longer.len() {
        return indel::normalized_similarity(shorter.iter().copied(), longer.iter().copied());
    }

    let mut best = 0.0_f64;
    for window in longer.windows(shorter.len()) {
        let score = indel::normalized_similarity(shorter.iter().copied(), window.iter().copied());
        if score > best {
            best = score;
            if best >= 1.0 {
                break;
            }
        }
    }
    best
}

/// Stable cache key for a URL or local path.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Case-insensitive prefix strip that respects char boundaries.
pub fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }

    let mut text_chars = text.char_indices();
    for p in prefix.chars() {
        let (_, t) = text_chars.next()?;
        if !t.to_lowercase().eq(p.to_lowercase()) {
            return None;
        }
    }

    let rest_start = text_chars.next().map(|(i, _)| i).unwrap_or(text.len());
    Some(&text[rest_start..])
}
