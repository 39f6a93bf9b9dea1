//! Markup cleanup before a page is handed to the assistant

use regex::Regex;
use std::sync::LazyLock;

/// Upper bound on markup bytes sent per turn
pub const MAX_HTML_BYTES: usize = 100_000;

/// Elements whose content never helps the assistant
static NOISE_ELEMENTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|svg|template)\b[^>]*>.*?</(script|style|noscript|svg|template)\s*>")
        .expect("Invalid noise element regex")
});

static COMMENTS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("Invalid comment regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Strip scripts, styles and comments, collapse whitespace and cap the size
pub fn clean_html(html: &str) -> String {
    let without_noise = NOISE_ELEMENTS.replace_all(html, "");
    let without_comments = COMMENTS.replace_all(&without_noise, "");
    let collapsed = WHITESPACE.replace_all(&without_comments, " ");
    truncate_unicode_safe(collapsed.trim().to_string(), MAX_HTML_BYTES)
}

/// Truncate a string to at most `max_bytes` bytes at a valid UTF-8 char boundary,
/// appending `…` if truncation occurred.
pub fn truncate_unicode_safe(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let boundary = s
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take_while(|&end| end <= max_bytes)
        .last()
        .unwrap_or(0);
    format!("{}…", &s[..boundary])
}
