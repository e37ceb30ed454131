//! Fuzzy matching utilities for transcripts
//!
//! Recognizers disagree on casing, punctuation and spacing. Everything that
//! compares transcripts goes through `normalize_text` first.

use lazy_static::lazy_static;
use regex::Regex;
use strsim::levenshtein;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\p{L}\p{N}'\s]+").expect("valid regex");
    static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("valid regex");
}

/// Lowercase, drop punctuation, collapse whitespace
pub fn normalize_text(text: &str) -> String {
    let lower = text.to_lowercase();
    let stripped = NON_WORD.replace_all(&lower, " ");
    collapse_whitespace(&stripped)
}

/// Trim and collapse runs of whitespace into single spaces
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").to_string()
}

/// Character-level edit distance
pub fn edit_distance(a: &str, b: &str) -> usize {
    levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Hey, JARVIS!  "), "hey jarvis");
        assert_eq!(normalize_text("what's   the\ttime?"), "what's the time");
        assert_eq!(normalize_text("..."), "");
    }

    #[test]
    fn test_edit_distance() {
        assert_eq!(edit_distance("jarvis", "jarvis"), 0);
        assert_eq!(edit_distance("jarves", "jarvis"), 1);
        assert_eq!(edit_distance("travis", "jarvis"), 3);
    }
}
