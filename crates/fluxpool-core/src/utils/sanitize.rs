//! Secret redaction and length capping for upstream-derived text.
//!
//! Everything that came from an upstream response passes through
//! [`sanitize_sensitive_text`] before it is logged or persisted.

use regex::Regex;
use std::sync::OnceLock;

static QUERY_SECRET_REGEX: OnceLock<Regex> = OnceLock::new();
static OPENAI_KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static ANTHROPIC_KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static GOOGLE_KEY_REGEX: OnceLock<Regex> = OnceLock::new();
static BEARER_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_query_secret_regex() -> &'static Regex {
    QUERY_SECRET_REGEX.get_or_init(|| {
        Regex::new(r#"(?i)([?&](?:key|api_key|client_secret|access_token|refresh_token)=)[^&"\s]+"#)
            .expect("query secret regex is valid")
    })
}

fn get_openai_key_regex() -> &'static Regex {
    OPENAI_KEY_REGEX.get_or_init(|| {
        Regex::new(r"\bsk-(?:proj-)?[A-Za-z0-9_-]{10,}\b").expect("openai key regex is valid")
    })
}

fn get_anthropic_key_regex() -> &'static Regex {
    ANTHROPIC_KEY_REGEX.get_or_init(|| {
        Regex::new(r"\bsk-ant-[A-Za-z0-9_-]{10,}\b").expect("anthropic key regex is valid")
    })
}

fn get_google_key_regex() -> &'static Regex {
    GOOGLE_KEY_REGEX.get_or_init(|| {
        Regex::new(r"\bAIza[0-9A-Za-z_-]{10,}\b").expect("google key regex is valid")
    })
}

fn get_bearer_regex() -> &'static Regex {
    BEARER_REGEX.get_or_init(|| {
        Regex::new(r"(?i)\b(bearer\s+)[A-Za-z0-9._~+/=-]{16,}").expect("bearer regex is valid")
    })
}

/// Redact API keys, bearer tokens and query-string secrets.
pub fn sanitize_sensitive_text(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let out = get_query_secret_regex().replace_all(input, "${1}***");
    // Anthropic keys share the `sk-` prefix, so they are redacted first.
    let out = get_anthropic_key_regex().replace_all(&out, "sk-ant-***");
    let out = get_openai_key_regex().replace_all(&out, "sk-***");
    let out = get_google_key_regex().replace_all(&out, "AIza***");
    let out = get_bearer_regex().replace_all(&out, "${1}***");
    out.into_owned()
}

/// Cut `input` to at most `max_bytes` on a char boundary, appending `...` when cut.
pub fn truncate_with_ellipsis(input: &str, max_bytes: usize) -> String {
    if input.len() <= max_bytes {
        return input.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &input[..end])
}

/// Sanitize then cap; used for every stored upstream message.
pub fn sanitize_and_truncate(input: &str, max_bytes: usize) -> String {
    truncate_with_ellipsis(&sanitize_sensitive_text(input.trim()), max_bytes)
}

/// Lossy, capped view of a raw body for log lines.
pub fn truncate_for_log(body: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(body);
    let flat = text.replace(['\n', '\r'], " ");
    sanitize_and_truncate(&flat, max_bytes)
}
