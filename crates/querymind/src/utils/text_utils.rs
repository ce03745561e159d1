//! Small text helpers shared by the sanitizer, prompts and logging

use std::borrow::Cow;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

pub struct TextUtils;

impl TextUtils {
    /// Check if text contains pattern (case-insensitive)
    pub fn contains_ignore_case(text: &str, pattern: &str) -> bool {
        if pattern.len() > text.len() {
            return false;
        }
        text.to_lowercase().contains(&pattern.to_lowercase())
    }

    /// Collapse every whitespace run to a single space and trim the ends
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Truncate to at most `max_chars` characters, marking the cut with "..."
    pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> Cow<'_, str> {
        if text.chars().count() <= max_chars {
            return Cow::Borrowed(text);
        }
        if max_chars <= 3 {
            return Cow::Borrowed("...");
        }
        let mut result: String = text.chars().take(max_chars - 3).collect();
        result.push_str("...");
        Cow::Owned(result)
    }

    /// First keyword of a statement, uppercased, skipping leading parentheses
    pub fn leading_keyword(sql: &str) -> String {
        sql.trim_start_matches(|c: char| c.is_whitespace() || c == '(')
            .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase()
    }
}
