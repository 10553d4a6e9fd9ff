//! Reason strings for usage-window pauses and recognising them later.

use fluxpool_types::{Platform, TempUnschedState};

use super::UsageWindow;
use crate::classify::messages::rfc3339;

/// Marker every usage-window pause reason carries.
pub const USAGE_EXCEEDED_MARKER: &str = "usage window exceeded";
/// Marker written by older releases.
const LEGACY_USAGE_EXCEEDED_MARKER: &str = "额度已超限";

/// `"<Platform> usage window exceeded: 5h used 99.0%, resets at <RFC3339>; ..."`
pub fn build_usage_exceeded_reason(platform: Platform, exceeded: &[UsageWindow]) -> String {
    let parts: Vec<String> = exceeded
        .iter()
        .map(|w| {
            let reset = w
                .reset_at
                .map_or_else(|| "reset time unknown".to_string(), |t| format!("resets at {}", rfc3339(t)));
            format!("{} used {:.1}%, {}", w.name, w.used_percent, reset)
        })
        .collect();
    format!("{} {}: {}", platform.label(), USAGE_EXCEEDED_MARKER, parts.join("; ")).trim().to_string()
}

/// Reason used while usage could not be read; keeps the pause recognisable.
pub fn build_usage_retry_reason(platform: Platform, detail: &str) -> String {
    format!("{} {} ({}, retrying later)", platform.label(), USAGE_EXCEEDED_MARKER, detail)
}

/// Compact log summary: `5h:99.0%@2026-03-01T16:00:00Z,7d:10.0%`.
pub fn format_usage_windows(windows: &[UsageWindow]) -> String {
    windows
        .iter()
        .map(|w| match w.reset_at {
            Some(reset) => format!("{}:{:.1}%@{}", w.name, w.used_percent, rfc3339(reset)),
            None => format!("{}:{:.1}%", w.name, w.used_percent),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether a stored temp-unschedulable reason was written by a usage-window pause.
///
/// Structured reasons count only when they carry the usage-window rule index;
/// plain text needs one of the usage markers. Matches the recovery candidate
/// query in the Postgres repository.
pub fn is_usage_quota_reason(reason: &str) -> bool {
    let reason = reason.trim();
    if reason.is_empty() {
        return false;
    }
    if let Some(state) = TempUnschedState::from_reason(reason) {
        return state.is_usage_window();
    }
    reason.contains(LEGACY_USAGE_EXCEEDED_MARKER) || reason.to_lowercase().contains(USAGE_EXCEEDED_MARKER)
}
