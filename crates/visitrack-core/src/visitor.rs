//! Visitor helpers — pure transforms applied before anything reaches the store.
//!
//! `classify` turns a user agent into a coarse browser/OS pair,
//! `sanitize_headers` escapes header values for display, and
//! `validate_input` screens ids arriving over the persistent connection.

use std::collections::BTreeMap;

/// Longest header value kept in session metadata.
pub const MAX_HEADER_LEN: usize = 500;

/// Longest session id accepted from a client.
pub const MAX_SESSION_ID_LEN: usize = 50;

/// Coarse browser and OS classification of a user agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub browser: String,
    pub os: String,
}

/// Classify a user agent string. Order matters: Edge and Opera carry
/// "Chrome" in their UA, Chrome carries "Safari", iOS carries "Mac OS X".
pub fn classify(user_agent: &str) -> ClientInfo {
    let browser = if user_agent.contains("Edg/") || user_agent.contains("Edge/") {
        "Edge"
    } else if user_agent.contains("OPR/") || user_agent.contains("Opera") {
        "Opera"
    } else if user_agent.contains("Firefox/") || user_agent.contains("FxiOS/") {
        "Firefox"
    } else if user_agent.contains("Chrome/") || user_agent.contains("CriOS/") {
        "Chrome"
    } else if user_agent.contains("Safari/") {
        "Safari"
    } else {
        "Unknown"
    };

    let os = if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        "iOS"
    } else if user_agent.contains("Android") {
        "Android"
    } else if user_agent.contains("Windows") {
        "Windows"
    } else if user_agent.contains("Mac OS X") || user_agent.contains("Macintosh") {
        "macOS"
    } else if user_agent.contains("CrOS") {
        "ChromeOS"
    } else if user_agent.contains("Linux") || user_agent.contains("X11") {
        "Linux"
    } else {
        "Unknown"
    };

    ClientInfo {
        browser: browser.to_string(),
        os: os.to_string(),
    }
}

/// Escape HTML-significant characters and cap each value's length.
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), escape_html(truncate(v, MAX_HEADER_LEN))))
        .collect()
}

/// Screen a client-supplied identifier.
///
/// Returns `None` for empty input, input longer than `max_len`, or anything
/// outside `[A-Za-z0-9_-]`.
pub fn validate_input(input: &str, max_len: usize) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.len() > max_len {
        return None;
    }
    trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        .then_some(trimmed)
}

/// Escape `& < > " '` for safe embedding in HTML.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
