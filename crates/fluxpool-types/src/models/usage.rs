//! Usage telemetry reported by provider usage endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One utilization bucket with its absolute reset time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UsageProgress {
    /// Percentage used, 0-100 (may exceed 100 when the provider overshoots)
    pub utilization: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
}

/// Generic usage snapshot: named windows with absolute resets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UsageInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub five_hour: Option<UsageProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seven_day: Option<UsageProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seven_day_sonnet: Option<UsageProgress>,
}

/// Per-account outcome of a usage refresh run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageRefreshResult {
    pub account_id: i64,
    pub action: String,
    pub outcome: String,
    pub detail: String,
}
