//! Text processing utilities.

use regex::Regex;
use std::sync::OnceLock;

static WHITESPACE_RE: OnceLock<Regex> = OnceLock::new();
static NON_WORD_RE: OnceLock<Regex> = OnceLock::new();

fn whitespace_re() -> &'static Regex {
    WHITESPACE_RE.get_or_init(|| Regex::new(r"\s+").expect("static regex is valid"))
}

fn non_word_re() -> &'static Regex {
    NON_WORD_RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9]+").expect("static regex is valid"))
}

/// Replace consecutive whitespace with a single space and trim both ends.
pub fn normalize_whitespace(s: &str) -> String {
    if s.is_empty() {
        return String::new();
    }
    whitespace_re().replace_all(s, " ").trim().to_string()
}

/// Lower-cased, whitespace-collapsed form of an entity value.
pub fn normalize_key(s: &str) -> String {
    normalize_whitespace(s).to_lowercase()
}

/// Normalize a free-form relationship label to `UPPER_SNAKE_CASE`.
///
/// `"works at"` → `"WORKS_AT"`, `"co-founded"` → `"CO_FOUNDED"`.
pub fn to_upper_snake(s: &str) -> String {
    non_word_re()
        .replace_all(s.trim(), "_")
        .trim_matches('_')
        .to_uppercase()
}

/// Truncate `s` to at most `max_len` characters, appending `"..."` if
/// truncation occurred. Counts chars, not bytes.
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if max_len == 0 {
        return String::new();
    }

    if s.chars().count() <= max_len {
        return s.to_string();
    }

    if max_len <= 3 {
        return ".".repeat(max_len);
    }

    let byte_offset = s
        .char_indices()
        .nth(max_len - 3)
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    format!("{}...", &s[..byte_offset])
}

/// Extract the first JSON object or array from a possibly markdown-wrapped
/// model response.
///
/// Tries a ` ```json ` fence, then a plain ` ``` ` fence, then the span from
/// the first `{` to the last `}` (or `[`/`]`).
pub fn extract_json_from_response(s: &str) -> Option<&str> {
    if let Some(inner) = extract_fenced_block(s, "```json") {
        return Some(inner);
    }
    if let Some(inner) = extract_fenced_block(s, "```") {
        return Some(inner);
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (s.find(open), s.rfind(close)) {
            if end > start {
                return Some(&s[start..=end]);
            }
        }
    }

    None
}

fn extract_fenced_block<'a>(s: &'a str, fence: &str) -> Option<&'a str> {
    let start = s.find(fence)?;
    let after_fence = start + fence.len();
    let newline = s[after_fence..].find('\n')?;
    let content_start = after_fence + newline + 1;
    let close = s[content_start..].find("```")?;
    let content = s[content_start..content_start + close].trim();

    (!content.is_empty()).then_some(content)
}
