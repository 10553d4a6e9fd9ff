//! Operator-facing reason strings. Every upstream-derived part is sanitized and capped.

use axum::http::HeaderMap;
use chrono::{DateTime, SecondsFormat, Utc};

use super::error_body::ErrorBody;
use super::reset::first_header;
use crate::utils::sanitize::{sanitize_and_truncate, truncate_with_ellipsis};

pub const REQUEST_ID_HEADERS: [&str; 3] = ["x-request-id", "request-id", "anthropic-request-id"];

/// Cap for stored reasons and custom-rule messages.
pub const MESSAGE_MAX_BYTES: usize = 2048;
const UPSTREAM_MESSAGE_MAX_BYTES: usize = 512;
const REQUEST_ID_MAX_BYTES: usize = 128;
const WWW_AUTHENTICATE_MAX_BYTES: usize = 256;
const UPSTREAM_CODE_MAX_BYTES: usize = 64;

pub const AUTH_401_MESSAGE: &str = "Authentication failed (401): invalid or expired credentials";
pub const PAYMENT_402_MESSAGE: &str = "Payment required (402): insufficient balance or billing issue";
pub const FORBIDDEN_403_MESSAGE: &str =
    "Access forbidden (403): account may be suspended or lack permissions";
pub const AUTH_COOLDOWN_MESSAGE: &str = "Upstream auth error, temporary cooldown";
pub const DEFAULT_TEMP_REASON: &str = "Temporary unschedulable";
pub const DEFAULT_UNSCHEDULABLE_REASON: &str = "Scheduling cancelled";

pub fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn request_id(headers: &HeaderMap) -> Option<String> {
    first_header(headers, &REQUEST_ID_HEADERS)
        .map(|id| sanitize_and_truncate(&id, REQUEST_ID_MAX_BYTES))
        .filter(|id| !id.is_empty())
}

fn upstream_message(body: &ErrorBody) -> Option<String> {
    body.message()
        .map(|m| sanitize_and_truncate(&m, UPSTREAM_MESSAGE_MAX_BYTES))
        .filter(|m| !m.is_empty())
}

fn push_part(out: &mut String, key: &str, value: Option<String>) {
    if let Some(value) = value {
        out.push_str("; ");
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
    }
}

/// Permanent-disable message: `base; upstream_message=..; request_id=..; www_authenticate=..`.
pub fn build_auth_error_message(base: &str, headers: &HeaderMap, body: &ErrorBody) -> String {
    let www_auth = headers
        .get(axum::http::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .map(|v| sanitize_and_truncate(v, WWW_AUTHENTICATE_MAX_BYTES))
        .filter(|v| !v.is_empty());

    let mut out = base.to_string();
    push_part(&mut out, "upstream_message", upstream_message(body));
    push_part(&mut out, "request_id", request_id(headers));
    push_part(&mut out, "www_authenticate", www_auth);
    out
}

/// Message stored inside the 401 cooldown state.
pub fn build_auth_cooldown_message(headers: &HeaderMap, body: &ErrorBody) -> String {
    let mut out = AUTH_COOLDOWN_MESSAGE.to_string();
    push_part(&mut out, "upstream_message", upstream_message(body));
    push_part(&mut out, "request_id", request_id(headers));
    out
}

/// Log reason for a quota-exceeded 429.
pub fn build_quota_exceeded_reason(
    code: Option<&str>,
    headers: &HeaderMap,
    body: &ErrorBody,
    reset_at: DateTime<Utc>,
) -> String {
    let code = code
        .map(|c| sanitize_and_truncate(c, UPSTREAM_CODE_MAX_BYTES))
        .filter(|c| !c.is_empty());

    let mut out = "Upstream quota exceeded (429)".to_string();
    push_part(&mut out, "upstream_code", code);
    push_part(&mut out, "reset_at", Some(rfc3339(reset_at)));
    push_part(&mut out, "upstream_message", upstream_message(body));
    push_part(&mut out, "request_id", request_id(headers));
    out
}

/// Log reason for a plain rate-limit 429.
pub fn build_rate_limit_reason(headers: &HeaderMap, body: &ErrorBody, reset_at: DateTime<Utc>) -> String {
    let mut out = format!("Upstream rate limited (429), cooling down until {}", rfc3339(reset_at));
    push_part(&mut out, "upstream_message", upstream_message(body));
    push_part(&mut out, "request_id", request_id(headers));
    out
}

/// Stored message for a fired custom rule.
pub fn build_custom_rule_message(description: &str, matched_keyword: &str, raw_body: &[u8]) -> String {
    let upstream = sanitize_and_truncate(&String::from_utf8_lossy(raw_body), MESSAGE_MAX_BYTES);
    let description = description.trim();
    if description.is_empty() {
        return upstream;
    }
    let msg = if matched_keyword.is_empty() {
        format!("{description}; upstream={upstream}")
    } else {
        format!("{description}; matched_keyword={matched_keyword}; upstream={upstream}")
    };
    truncate_with_ellipsis(&msg, MESSAGE_MAX_BYTES)
}

/// Normalise an operator/system reason before a hard unschedule.
pub fn normalize_unschedulable_reason(reason: &str) -> String {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return DEFAULT_UNSCHEDULABLE_REASON.to_string();
    }
    sanitize_and_truncate(trimmed, MESSAGE_MAX_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_auth_error_message_parts() {
        let mut headers = HeaderMap::new();
        headers.insert("request-id", HeaderValue::from_static("req_123"));
        headers.insert("www-authenticate", HeaderValue::from_static("Bearer realm=\"api\""));
        let body = ErrorBody::parse(br#"{"error":{"message":"key sk-abcdefghijklmnopqrstu revoked"}}"#);

        let msg = build_auth_error_message(FORBIDDEN_403_MESSAGE, &headers, &body);
        assert_eq!(
            msg,
            "Access forbidden (403): account may be suspended or lack permissions; \
             upstream_message=key sk-*** revoked; request_id=req_123; \
             www_authenticate=Bearer realm=\"api\""
        );
    }

    #[test]
    fn test_auth_error_message_without_extras() {
        let msg = build_auth_error_message(PAYMENT_402_MESSAGE, &HeaderMap::new(), &ErrorBody::parse(b""));
        assert_eq!(msg, PAYMENT_402_MESSAGE);
    }

    #[test]
    fn test_upstream_message_capped() {
        let long = format!(r#"{{"error":{{"message":"{}"}}}}"#, "x".repeat(600));
        let msg = build_auth_cooldown_message(&HeaderMap::new(), &ErrorBody::parse(long.as_bytes()));
        assert!(msg.ends_with("..."));
        assert!(msg.len() < AUTH_COOLDOWN_MESSAGE.len() + 20 + 512 + 3 + 1);
    }

    #[test]
    fn test_custom_rule_message() {
        let msg = build_custom_rule_message("provider ban", "banned", b"account banned for abuse");
        assert_eq!(msg, "provider ban; matched_keyword=banned; upstream=account banned for abuse");

        let huge = vec![b'a'; 5000];
        let msg = build_custom_rule_message("d", "a", &huge);
        assert!(msg.len() <= MESSAGE_MAX_BYTES + 3);
    }

    #[test]
    fn test_normalize_unschedulable_reason() {
        assert_eq!(normalize_unschedulable_reason("  "), DEFAULT_UNSCHEDULABLE_REASON);
        assert_eq!(normalize_unschedulable_reason(" expired "), "expired");
    }
}
