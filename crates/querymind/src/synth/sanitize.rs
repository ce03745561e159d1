//! Strips formatting artifacts from raw model output.

use lazy_static::lazy_static;
use regex::Regex;

use crate::utils::TextUtils;

lazy_static! {
    static ref LEADING_FENCE: Regex = Regex::new(r"(?i)^```[a-z0-9_+-]*[ \t]*").unwrap();
    static ref TRAILING_FENCE: Regex = Regex::new(r"\s*```\s*$").unwrap();
}

const FENCE: &str = "```";

/// Remove fences and comments, collapse whitespace and drop one trailing `;`.
pub fn sanitize(raw: &str) -> String {
    let text = raw.trim();
    let text = LEADING_FENCE.replace(text, "");
    let text = TRAILING_FENCE.replace(&text, "");

    let mut kept: Vec<&str> = Vec::new();
    let mut in_block_comment = false;
    for line in text.lines().map(str::trim) {
        let line = if in_block_comment {
            match line.find("*/") {
                Some(end) => {
                    in_block_comment = false;
                    line[end + 2..].trim()
                }
                None => continue,
            }
        } else if line.starts_with("/*") && !line.contains("*/") {
            in_block_comment = true;
            continue;
        } else {
            line
        };

        if is_comment_line(line) || line.starts_with(FENCE) {
            continue;
        }
        let line = strip_inline_comment(line).trim();
        if !line.is_empty() {
            kept.push(line);
        }
    }

    let joined = kept.join(" ").replace(FENCE, "");
    let mut sql = TextUtils::normalize_whitespace(&joined).into_owned();
    if sql.ends_with(';') {
        sql.pop();
        sql.truncate(sql.trim_end().len());
    }
    sql
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with("--")
        || line.starts_with('#')
        || (line.starts_with("/*") && line.ends_with("*/"))
}

/// Cut a trailing `--` or `#` comment that sits outside any quoted literal.
fn strip_inline_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut prev = '\0';
    for (idx, ch) in line.char_indices() {
        match quote {
            Some(q) => {
                if ch == q && prev != '\\' {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '#' => return &line[..idx],
                '-' if prev == '-' => return &line[..idx - 1],
                _ => {}
            },
        }
        prev = ch;
    }
    line
}
