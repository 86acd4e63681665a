//! Bounded string rendering for log output.

/// Default number of characters kept by [`truncated`].
pub const DEFAULT_TRUNCATION_LIMIT: usize = 10_000;

/// Default marker inserted where characters were dropped.
pub const DEFAULT_TRUNCATION_LEADER: &str = "...";

/// Which part of an oversized string is replaced by the leader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TruncationPosition {
    /// Drop the beginning, keep the tail
    Head,
    /// Keep both ends, drop the middle
    #[default]
    Middle,
    /// Keep the beginning, drop the tail
    Tail,
}

/// Shorten `text` to at most `limit` characters, leader included.
///
/// Strings that already fit are returned unchanged. Lengths are counted in
/// `char`s so multi-byte text is never split inside a code point. With
/// [`TruncationPosition::Middle`] the head gets the extra character when the
/// remaining budget is odd. A leader longer than `limit` is cut to `limit`.
#[must_use]
pub fn truncated(text: &str, limit: usize, position: TruncationPosition, leader: &str) -> String {
    let count = text.chars().count();
    if count <= limit {
        return text.to_owned();
    }

    let leader: String = leader.chars().take(limit).collect();
    let budget = limit - leader.chars().count();
    match position {
        TruncationPosition::Head => {
            let tail: String = text.chars().skip(count - budget).collect();
            format!("{leader}{tail}")
        }
        TruncationPosition::Middle => {
            let tail_len = budget.div_euclid(2);
            let head_len = budget - tail_len;
            let head: String = text.chars().take(head_len).collect();
            let tail: String = text.chars().skip(count - tail_len).collect();
            format!("{head}{leader}{tail}")
        }
        TruncationPosition::Tail => {
            let head: String = text.chars().take(budget).collect();
            format!("{head}{leader}")
        }
    }
}

/// [`truncated`] with the default limit, middle position and leader.
#[must_use]
pub fn truncated_default(text: &str) -> String {
    truncated(
        text,
        DEFAULT_TRUNCATION_LIMIT,
        TruncationPosition::Middle,
        DEFAULT_TRUNCATION_LEADER,
    )
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_untouched() {
        assert_eq!(
            truncated("hello", 10, TruncationPosition::Middle, "..."),
            "hello"
        );
        assert_eq!(
            truncated("exactly10!", 10, TruncationPosition::Tail, "..."),
            "exactly10!"
        );
    }

    #[test]
    fn test_middle_keeps_limit_with_leader_at_midpoint() {
        let text = "a".repeat(20_000);
        let result = truncated(&text, 10_000, TruncationPosition::Middle, "...");

        assert_eq!(result.chars().count(), 10_000);
        // 9997 remaining characters: head 4999, tail 4998
        assert_eq!(result.find("...").unwrap(), 4999);
        assert!(result.starts_with('a'));
        assert!(result.ends_with('a'));
    }

    #[test]
    fn test_middle_splits_odd_budget_towards_head() {
        let result = truncated("abcdefghij", 6, TruncationPosition::Middle, "-");
        assert_eq!(result, "abc-ij");
    }

    #[test]
    fn test_head_keeps_tail() {
        let result = truncated("abcdefghij", 5, TruncationPosition::Head, "..");
        assert_eq!(result, "..hij");
    }

    #[test]
    fn test_tail_keeps_head() {
        let result = truncated("abcdefghij", 5, TruncationPosition::Tail, "..");
        assert_eq!(result, "abc..");
    }

    #[test]
    fn test_counts_chars_not_bytes() {
        let text = "\u{444}".repeat(12);
        let result = truncated(&text, 5, TruncationPosition::Middle, "~");
        assert_eq!(result.chars().count(), 5);
        assert_eq!(result, "\u{444}\u{444}~\u{444}\u{444}");
    }

    #[test]
    fn test_leader_longer_than_limit_is_cut_to_limit() {
        let result = truncated("abcdefghij", 2, TruncationPosition::Tail, "...");
        assert_eq!(result, "..");

        let result = truncated("abcdefghij", 4, TruncationPosition::Middle, "[cut here]");
        assert_eq!(result, "[cut");
        assert_eq!(
            truncated("abcdefghij", 0, TruncationPosition::Head, "..."),
            ""
        );
    }
}
