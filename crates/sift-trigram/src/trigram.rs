//! Trigram extraction.
//!
//! A trigram is a window of 3 consecutive bytes of lowercased text,
//! packed into a `u32` code. Index time and query time must use the same
//! decomposition, so both go through [`trigrams_of`].

use std::collections::HashSet;

/// Needles shorter than this decompose into no trigrams and fall back to
/// a full scan.
pub const MIN_NEEDLE_LEN: usize = 3;

/// How many leading bytes [`is_binary`] inspects.
const BINARY_PROBE_LEN: usize = 1024;

/// Pack one 3-byte window into its trigram code.
#[inline]
pub fn pack(window: &[u8]) -> u32 {
    debug_assert_eq!(window.len(), 3);
    (window[0] as u32) << 16 | (window[1] as u32) << 8 | window[2] as u32
}

/// The set of trigram codes of lowercased `text`.
///
/// Inputs shorter than 3 bytes produce an empty set.
pub fn trigrams_of(text: &str) -> HashSet<u32> {
    let lowered = text.to_lowercase();
    let bytes = lowered.as_bytes();
    let mut out = HashSet::new();
    if bytes.len() < 3 {
        return out;
    }
    for window in bytes.windows(3) {
        out.insert(pack(window));
    }
    out
}

/// Cheap binary-content heuristic: a NUL byte in the leading probe
/// window. Binary inputs produce no trigrams.
pub fn is_binary(content: &[u8]) -> bool {
    content
        .iter()
        .take(BINARY_PROBE_LEN)
        .any(|&byte| byte == 0)
}

/// True if `haystack` contains `needle`, case-insensitively. This is the
/// precise predicate applied to trigram candidates to eliminate false
/// positives from code collisions.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_has_no_trigrams() {
        assert!(trigrams_of("").is_empty());
        assert!(trigrams_of("ab").is_empty());
        assert_eq!(trigrams_of("abc").len(), 1);
    }

    #[test]
    fn test_case_insensitive_codes() {
        assert_eq!(trigrams_of("Hello"), trigrams_of("hello"));
        assert_eq!(trigrams_of("HELLO"), trigrams_of("hello"));
    }

    #[test]
    fn test_window_count() {
        // "hello" -> hel, ell, llo
        assert_eq!(trigrams_of("hello").len(), 3);
        // Repeated windows dedupe: "aaaa" -> aaa
        assert_eq!(trigrams_of("aaaa").len(), 1);
    }

    #[test]
    fn test_needle_decomposition_subset_of_content() {
        let content = trigrams_of("hello world");
        let needle = trigrams_of("hello");
        assert!(needle.is_subset(&content));
    }

    #[test]
    fn test_is_binary() {
        assert!(is_binary(b"ELF\x00\x01\x02"));
        assert!(!is_binary(b"plain text, nothing else"));
    }

    #[test]
    fn test_contains_ignore_case() {
        assert!(contains_ignore_case("Hello World", "hello"));
        assert!(contains_ignore_case("Hello World", "o w"));
        assert!(!contains_ignore_case("Hello World", "planet"));
        assert!(contains_ignore_case("anything", ""));
    }
}
