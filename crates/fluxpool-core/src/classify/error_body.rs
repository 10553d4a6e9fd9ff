//! Typed accessor over upstream JSON error bodies.
//!
//! Providers disagree on where they put codes and messages; this keeps the
//! lookups in one place so classifier branches read `body.error_code()`
//! instead of chained `get` calls.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

/// Parsed view of a response body. Non-JSON bodies yield an empty view.
#[derive(Debug, Clone, Default)]
pub struct ErrorBody {
    root: Option<Value>,
}

impl ErrorBody {
    pub fn parse(body: &[u8]) -> Self {
        let root = serde_json::from_slice::<Value>(body).ok().filter(Value::is_object);
        Self { root }
    }

    pub const fn is_json(&self) -> bool {
        self.root.is_some()
    }

    fn top(&self, key: &str) -> Option<&Value> {
        self.root.as_ref()?.get(key)
    }

    fn error_object(&self) -> Option<&Map<String, Value>> {
        self.top("error")?.as_object()
    }

    fn error_field(&self, key: &str) -> Option<&Value> {
        self.error_object()?.get(key)
    }

    /// `error.code`
    pub fn error_code(&self) -> Option<String> {
        self.error_field("code").and_then(scalar_string)
    }

    /// `error.type`
    pub fn error_type(&self) -> Option<String> {
        self.error_field("type").and_then(scalar_string)
    }

    /// `error.status`
    pub fn error_status(&self) -> Option<String> {
        self.error_field("status").and_then(scalar_string)
    }

    /// Top-level `type`
    pub fn top_level_type(&self) -> Option<String> {
        self.top("type").and_then(scalar_string)
    }

    /// All code-like fields, lower-cased, in lookup order.
    pub fn code_candidates(&self) -> Vec<String> {
        [self.error_code(), self.error_type(), self.error_status(), self.top_level_type()]
            .into_iter()
            .flatten()
            .map(|c| c.to_lowercase())
            .collect()
    }

    /// Human message: `error.message`, `message`, string `error`, then `detail`.
    pub fn message(&self) -> Option<String> {
        self.error_field("message")
            .and_then(scalar_string)
            .or_else(|| self.top("message").and_then(scalar_string))
            .or_else(|| self.top("error").filter(|v| v.is_string()).and_then(scalar_string))
            .or_else(|| self.top("detail").and_then(scalar_string))
    }

    /// Absolute reset from `error.resets_at` / `resets_at` (Unix seconds).
    pub fn resets_at(&self) -> Option<DateTime<Utc>> {
        [self.error_field("resets_at"), self.top("resets_at")]
            .into_iter()
            .flatten()
            .filter_map(positive_int)
            .find_map(|unix| DateTime::from_timestamp(unix, 0))
    }

    /// Relative reset from `error.resets_in_seconds` / `resets_in_seconds`.
    pub fn resets_in_seconds(&self) -> Option<i64> {
        [self.error_field("resets_in_seconds"), self.top("resets_in_seconds")]
            .into_iter()
            .flatten()
            .find_map(positive_int)
    }

    /// First body-declared reset, absolute fields before relative ones.
    pub fn reset_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.resets_at()
            .or_else(|| {
                let secs = Duration::try_seconds(self.resets_in_seconds()?)?;
                now.checked_add_signed(secs)
            })
    }
}

/// Strings (trimmed, non-empty) and numbers rendered as text.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        },
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn positive_int(value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    (parsed > 0).then_some(parsed)
}

/// Body looks like an HTML error page rather than an API error.
pub fn looks_like_html(body: &[u8]) -> bool {
    let head = &body[..body.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start().to_ascii_lowercase();
    trimmed.starts_with("<!doctype") || trimmed.starts_with("<html")
}
