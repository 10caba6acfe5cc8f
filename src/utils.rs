use chrono::{DateTime, FixedOffset, Local};
use lazy_regex::regex;

pub(crate) fn get_now() -> DateTime<FixedOffset> {
    let now = Local::now();
    now.with_timezone(now.offset())
}

/// Replaces every run of whitespace with a single space and trims the ends.
pub(crate) fn collapse_whitespace(s: &str) -> String {
    regex!(r"\s+").replace_all(s, " ").trim().to_string()
}

/// Longest prefix of `s` that is at most `max` bytes and ends on a char boundary.
pub(crate) fn bounded(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_mixed_whitespace() {
        assert_eq!(collapse_whitespace("  a\t\tb\n\n c \u{a0}"), "a b c");
        assert_eq!(collapse_whitespace(" \n\t "), "");
    }

    #[test]
    fn bounded_respects_char_boundaries() {
        assert_eq!(bounded("hello", 10), "hello");
        assert_eq!(bounded("hello", 3), "hel");
        // 'é' is two bytes; cutting in the middle backs off.
        assert_eq!(bounded("café", 4), "caf");
        assert_eq!(bounded("café", 5), "café");
    }
}
