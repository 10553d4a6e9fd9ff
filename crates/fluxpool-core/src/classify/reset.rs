//! Reset-timestamp parsing for rate-limit headers and values.
//!
//! Accepted value shapes, tried in order:
//! - integer: > 1e12 is Unix milliseconds, > 1e9 is Unix seconds, otherwise seconds from now
//! - Go-style duration (`1h30m`, `45s`, `250ms`, `1.5h`)
//! - RFC3339
//! - HTTP-date (`Wed, 21 Oct 2015 07:28:00 GMT`)

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Anthropic's unified reset; also the only header that back-derives the 5h window.
pub const UNIFIED_RESET_HEADER: &str = "anthropic-ratelimit-unified-reset";

/// Reset headers in lookup order.
pub const RESET_HEADERS: [&str; 6] = [
    UNIFIED_RESET_HEADER,
    "retry-after",
    "x-ratelimit-reset-requests",
    "x-ratelimit-reset-tokens",
    "x-ratelimit-reset",
    "ratelimit-reset",
];

static GO_DURATION_REGEX: OnceLock<Regex> = OnceLock::new();
static GO_DURATION_PART_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_go_duration_regex() -> &'static Regex {
    GO_DURATION_REGEX.get_or_init(|| {
        Regex::new(r"^(?:\d+(?:\.\d+)?(?:ns|us|µs|ms|s|m|h))+$").expect("Go duration regex is valid")
    })
}

fn get_go_duration_part_regex() -> &'static Regex {
    GO_DURATION_PART_REGEX.get_or_init(|| {
        Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)").expect("Go duration part regex is valid")
    })
}

/// Parse a Go `time.ParseDuration`-style string (unsigned).
pub fn parse_go_duration(s: &str) -> Option<Duration> {
    let value = s.trim();
    if value == "0" {
        return Some(Duration::zero());
    }
    if !get_go_duration_regex().is_match(value) {
        return None;
    }

    let mut total_nanos: f64 = 0.0;
    for caps in get_go_duration_part_regex().captures_iter(value) {
        let amount: f64 = caps[1].parse().ok()?;
        let unit_nanos = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" => 1_000.0,
            "ms" => 1_000_000.0,
            "s" => 1_000_000_000.0,
            "m" => 60_000_000_000.0,
            "h" => 3_600_000_000_000.0,
            _ => return None,
        };
        total_nanos += amount * unit_nanos;
    }

    if !total_nanos.is_finite() || total_nanos > i64::MAX as f64 {
        tracing::debug!("[ResetParse] duration overflow: '{}'", value);
        return None;
    }
    Some(Duration::nanoseconds(total_nanos.round() as i64))
}

/// Parse one reset value relative to `now`.
pub fn parse_reset_value(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ts) = value.parse::<i64>() {
        return match ts {
            ts if ts > 1_000_000_000_000 => DateTime::from_timestamp_millis(ts),
            ts if ts > 1_000_000_000 => DateTime::from_timestamp(ts, 0),
            ts => now.checked_add_signed(Duration::try_seconds(ts)?),
        };
    }

    if let Some(duration) = parse_go_duration(value) {
        return now.checked_add_signed(duration);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    tracing::debug!("[ResetParse] unrecognised reset value: '{}'", value);
    None
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
}

/// First parseable reset across [`RESET_HEADERS`].
pub fn parse_reset_from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    RESET_HEADERS
        .iter()
        .filter_map(|name| header_str(headers, name))
        .find_map(|value| parse_reset_value(value, now))
}

/// Parsed `anthropic-ratelimit-unified-reset`, if present.
pub fn parse_unified_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    header_str(headers, UNIFIED_RESET_HEADER).and_then(|value| parse_reset_value(value, now))
}

/// First non-empty header among `names`.
pub fn first_header(headers: &HeaderMap, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| header_str(headers, name)).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default()
    }

    #[test]
    fn test_integer_magnitudes() {
        assert_eq!(
            parse_reset_value("1700000600000", now()).map(|t| t.timestamp_millis()),
            Some(1_700_000_600_000)
        );
        assert_eq!(
            parse_reset_value("1700000600", now()).map(|t| t.timestamp()),
            Some(1_700_000_600)
        );
        assert_eq!(parse_reset_value("30", now()).map(|t| t.timestamp()), Some(1_700_000_030));
    }

    #[test]
    fn test_go_durations() {
        assert_eq!(parse_go_duration("1h30m"), Some(Duration::minutes(90)));
        assert_eq!(parse_go_duration("1.5s"), Some(Duration::milliseconds(1500)));
        assert_eq!(parse_go_duration("250ms"), Some(Duration::milliseconds(250)));
        assert_eq!(parse_go_duration("6m0s"), Some(Duration::minutes(6)));
        assert_eq!(parse_go_duration("abc"), None);
        assert_eq!(parse_go_duration("5 minutes"), None);
        assert_eq!(
            parse_reset_value("2m", now()).map(|t| t.timestamp()),
            Some(1_700_000_120)
        );
    }

    #[test]
    fn test_rfc3339_and_http_date() {
        assert_eq!(
            parse_reset_value("2023-11-14T23:13:20Z", now()).map(|t| t.timestamp()),
            Some(1_700_003_600)
        );
        assert_eq!(
            parse_reset_value("Tue, 14 Nov 2023 23:13:20 GMT", now()).map(|t| t.timestamp()),
            Some(1_700_003_600)
        );
        assert_eq!(parse_reset_value("soon", now()), None);
    }

    #[test]
    fn test_header_lookup_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-ratelimit-reset", HeaderValue::from_static("60"));
        headers.insert("retry-after", HeaderValue::from_static("not-a-time"));
        // Unparseable retry-after falls through to the next header.
        assert_eq!(
            parse_reset_from_headers(&headers, now()).map(|t| t.timestamp()),
            Some(1_700_000_060)
        );

        headers.insert(UNIFIED_RESET_HEADER, HeaderValue::from_static("1700000600"));
        assert_eq!(
            parse_reset_from_headers(&headers, now()).map(|t| t.timestamp()),
            Some(1_700_000_600)
        );
        assert!(parse_unified_reset(&headers, now()).is_some());
    }
}
