//! Account health value objects persisted alongside the account row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rule index recorded for the generic 401 cooldown.
pub const RULE_INDEX_AUTH_COOLDOWN: i32 = -1;
/// Rule index recorded for usage-window and system-triggered pauses.
pub const RULE_INDEX_USAGE_WINDOW: i32 = -2;

/// Structured temp-unschedulable payload.
///
/// Serialized as JSON into `temp_unschedulable_reason` and mirrored in the cache.
/// `rule_index` is ≥ 0 for a matched custom rule, or one of the `RULE_INDEX_*`
/// constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TempUnschedState {
    #[serde(default)]
    pub until_unix: i64,
    #[serde(default)]
    pub triggered_at_unix: i64,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub rule_index: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub matched_keyword: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
}

impl TempUnschedState {
    /// Parse a stored reason; plain-text reasons return `None`.
    pub fn from_reason(reason: &str) -> Option<Self> {
        let trimmed = reason.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }

    /// Serialize for storage as a reason; falls back to the bare message.
    pub fn to_reason(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.error_message.clone())
    }

    pub const fn is_active_at(&self, now_unix: i64) -> bool {
        self.until_unix > now_unix
    }

    pub const fn is_usage_window(&self) -> bool {
        self.rule_index == RULE_INDEX_USAGE_WINDOW
    }
}

/// Status reported by the provider for its rolling session window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionWindowStatus {
    #[default]
    Allowed,
    AllowedWarning,
    Rejected,
}

impl SessionWindowStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::AllowedWarning => "allowed_warning",
            Self::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allowed" => Some(Self::Allowed),
            "allowed_warning" => Some(Self::AllowedWarning),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Provider rolling session window, back-derived from reset timestamps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: SessionWindowStatus,
}

impl SessionWindow {
    /// Window is missing its bounds or has already ended.
    pub fn needs_init(window: Option<&Self>, now: DateTime<Utc>) -> bool {
        window.map_or(true, |w| w.end <= now)
    }
}
