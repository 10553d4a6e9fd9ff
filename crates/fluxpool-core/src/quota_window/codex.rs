//! Codex usage snapshot: probe headers in, canonical `extra` fields out.
//!
//! The probe reports two raw windows, "primary" and "secondary", whose roles
//! depend on their declared lengths. They are stored verbatim and also mapped
//! onto canonical `codex_5h_*` / `codex_7d_*` keys that the window source reads.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use fluxpool_types::Account;
use serde_json::{Map, Value};

use super::source::UsageFetchError;
use super::UsageWindow;
use crate::classify::messages::rfc3339;

/// Windows declared at or under this length are the short (5h) window.
pub const SHORT_WINDOW_MAX_MINUTES: i64 = 360;

pub const UPDATED_AT_KEY: &str = "codex_usage_updated_at";

/// Sends a minimal request for an OpenAI account and returns the response headers.
#[async_trait]
pub trait CodexProber: Send + Sync {
    async fn probe(&self, account: &Account) -> Result<HeaderMap, UsageFetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CodexWindowSnapshot {
    pub used_percent: Option<f64>,
    pub reset_after_seconds: Option<i64>,
    pub window_minutes: Option<i64>,
}

impl CodexWindowSnapshot {
    fn from_headers(headers: &HeaderMap, prefix: &str) -> Self {
        Self {
            used_percent: header_parse(headers, &format!("{prefix}-used-percent")),
            reset_after_seconds: header_parse(headers, &format!("{prefix}-reset-after-seconds")),
            window_minutes: header_parse(headers, &format!("{prefix}-window-minutes")),
        }
    }

    const fn is_empty(&self) -> bool {
        self.used_percent.is_none() && self.reset_after_seconds.is_none() && self.window_minutes.is_none()
    }

    fn write_into(&self, updates: &mut Map<String, Value>, prefix: &str) {
        if let Some(used) = self.used_percent {
            updates.insert(format!("{prefix}_used_percent"), Value::from(used));
        }
        if let Some(reset) = self.reset_after_seconds {
            updates.insert(format!("{prefix}_reset_after_seconds"), Value::from(reset));
        }
        if let Some(minutes) = self.window_minutes {
            updates.insert(format!("{prefix}_window_minutes"), Value::from(minutes));
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CodexUsageSnapshot {
    pub primary: CodexWindowSnapshot,
    pub secondary: CodexWindowSnapshot,
    pub primary_over_secondary_percent: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CodexUsageSnapshot {
    /// `None` when the response carried no usage headers at all.
    pub fn from_headers(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Self> {
        let snapshot = Self {
            primary: CodexWindowSnapshot::from_headers(headers, "x-codex-primary"),
            secondary: CodexWindowSnapshot::from_headers(headers, "x-codex-secondary"),
            primary_over_secondary_percent: header_parse(
                headers,
                "x-codex-primary-over-secondary-limit-percent",
            ),
            updated_at: Some(now),
        };
        let empty = snapshot.primary.is_empty()
            && snapshot.secondary.is_empty()
            && snapshot.primary_over_secondary_percent.is_none();
        (!empty).then_some(snapshot)
    }

    /// Which raw window becomes the canonical 5h and 7d bucket.
    fn canonical(&self) -> (Option<&CodexWindowSnapshot>, Option<&CodexWindowSnapshot>) {
        let (primary, secondary) = (&self.primary, &self.secondary);
        match (primary.window_minutes, secondary.window_minutes) {
            (Some(p), Some(s)) if p < s => (Some(primary), Some(secondary)),
            (Some(_), Some(_)) => (Some(secondary), Some(primary)),
            (Some(p), None) if p <= SHORT_WINDOW_MAX_MINUTES => (Some(primary), None),
            (Some(_), None) => (None, Some(primary)),
            (None, Some(s)) if s <= SHORT_WINDOW_MAX_MINUTES => (Some(secondary), None),
            (None, Some(_)) => (None, Some(secondary)),
            (None, None) => (
                (!secondary.is_empty()).then_some(secondary),
                (!primary.is_empty()).then_some(primary),
            ),
        }
    }

    /// Fields to merge into `account.extra`.
    pub fn to_extra_updates(&self, now: DateTime<Utc>) -> Map<String, Value> {
        let mut updates = Map::new();
        self.primary.write_into(&mut updates, "codex_primary");
        self.secondary.write_into(&mut updates, "codex_secondary");
        if let Some(ratio) = self.primary_over_secondary_percent {
            updates.insert("codex_primary_over_secondary_percent".into(), Value::from(ratio));
        }
        updates.insert(UPDATED_AT_KEY.into(), Value::from(rfc3339(self.updated_at.unwrap_or(now))));

        let (short, long) = self.canonical();
        if let Some(short) = short {
            short.write_into(&mut updates, "codex_5h");
        }
        if let Some(long) = long {
            long.write_into(&mut updates, "codex_7d");
        }
        updates
    }
}

fn header_parse<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

pub fn extra_f64(extra: &Map<String, Value>, key: &str) -> Option<f64> {
    match extra.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn extra_i64(extra: &Map<String, Value>, key: &str) -> Option<i64> {
    match extra.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn extra_time(extra: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    let raw = extra.get(key)?.as_str()?.trim();
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
}

/// Canonical windows stored in `extra`, anchored at `codex_usage_updated_at`.
///
/// A window without a positive reset offset, or whose reset falls outside
/// the calendar, is skipped.
pub fn codex_usage_windows(extra: &Map<String, Value>, now: DateTime<Utc>) -> Vec<UsageWindow> {
    let base = extra_time(extra, UPDATED_AT_KEY).unwrap_or(now);
    ["5h", "7d"]
        .into_iter()
        .filter_map(|name| {
            let used = extra_f64(extra, &format!("codex_{name}_used_percent"))?;
            let reset_after = extra_i64(extra, &format!("codex_{name}_reset_after_seconds"))
                .filter(|secs| *secs > 0)?;
            let reset_at = base.checked_add_signed(Duration::try_seconds(reset_after)?)?;
            Some(UsageWindow::new(name, used, Some(reset_at)))
        })
        .collect()
}
