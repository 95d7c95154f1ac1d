//! Bounded-size payload truncation for notification text fields (spec
//! §4.8 "truncation").

/// The result of truncating a field: the (possibly shortened) text, plus
/// whether truncation actually happened so callers can surface that to
/// operators instead of silently losing content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    pub was_truncated: bool,
}

/// Truncates `s` to at most `max_runes` Unicode scalar values, the limit
/// used for narrow channels like SMS (spec §4.8).
pub fn truncate_runes(s: &str, max_runes: usize) -> Truncated {
    let mut chars = s.chars();
    let truncated: String = chars.by_ref().take(max_runes).collect();
    let was_truncated = chars.next().is_some();
    Truncated { text: truncated, was_truncated }
}

/// Truncates `s` to at most `max_bytes` UTF-8 bytes, never splitting a
/// multi-byte character, the limit used for most other receivers (spec
/// §4.8).
pub fn truncate_bytes(s: &str, max_bytes: usize) -> Truncated {
    if s.len() <= max_bytes {
        return Truncated { text: s.to_string(), was_truncated: false };
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    Truncated { text: s[..end].to_string(), was_truncated: true }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_runes_counts_scalars_not_bytes() {
        let t = truncate_runes("hello", 3);
        assert_eq!(t.text, "hel");
        assert!(t.was_truncated);
    }

    #[test]
    fn truncate_runes_leaves_short_strings_alone() {
        let t = truncate_runes("hi", 10);
        assert_eq!(t.text, "hi");
        assert!(!t.was_truncated);
    }

    #[test]
    fn truncate_bytes_never_splits_a_multibyte_char() {
        let s = "a\u{1F600}b"; // 1 + 4 + 1 bytes
        let t = truncate_bytes(s, 3);
        assert!(t.text.len() <= 3);
        assert!(t.was_truncated);
        assert!(std::str::from_utf8(t.text.as_bytes()).is_ok());
    }

    #[test]
    fn truncate_bytes_leaves_short_strings_alone() {
        let t = truncate_bytes("hi", 10);
        assert_eq!(t.text, "hi");
        assert!(!t.was_truncated);
    }
}
