//! Usage-window evaluation independent of live upstream failures.
//!
//! A window is exceeded when its utilisation reaches the threshold and its
//! reset has not passed yet. A window with no known reset counts as exceeded;
//! callers resume such accounts after a fallback cooldown. The monitor only
//! reports; pausing is up to the caller.

pub mod codex;
mod reason;
mod source;

pub use codex::{codex_usage_windows, CodexProber, CodexUsageSnapshot, CodexWindowSnapshot};
pub use reason::{
    build_usage_exceeded_reason, build_usage_retry_reason, format_usage_windows,
    is_usage_quota_reason, USAGE_EXCEEDED_MARKER,
};
pub use source::{
    CodexUsageSource, GenericUsageSource, PlatformUsageSource, UsageFetchError, UsageFetcher,
    UsageWindowSource,
};

use chrono::{DateTime, Duration, Utc};
use fluxpool_types::Account;
use serde::{Deserialize, Serialize};

/// One utilisation window, normalised across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageWindow {
    /// `5h`, `7d`, `7d_sonnet`, ...
    pub name: String,
    pub used_percent: f64,
    pub reset_at: Option<DateTime<Utc>>,
}

impl UsageWindow {
    pub fn new(name: impl Into<String>, used_percent: f64, reset_at: Option<DateTime<Utc>>) -> Self {
        Self { name: name.into(), used_percent, reset_at }
    }

    pub fn is_exceeded(&self, threshold: f64, now: DateTime<Utc>) -> bool {
        if self.used_percent < threshold {
            return false;
        }
        self.reset_at.map_or(true, |reset| reset > now)
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WindowEvaluation {
    pub windows: Vec<UsageWindow>,
    pub exceeded: Vec<UsageWindow>,
}

impl WindowEvaluation {
    pub fn is_exceeded(&self) -> bool {
        !self.exceeded.is_empty()
    }

    /// Latest still-future reset among exceeded windows, else `now + fallback`.
    pub fn resume_at(&self, now: DateTime<Utc>, fallback: Duration) -> DateTime<Utc> {
        latest_future_reset(&self.exceeded, now).unwrap_or(now + fallback)
    }
}

/// Windows at or over `threshold` whose reset is still ahead.
pub fn exceeded_windows(windows: &[UsageWindow], threshold: f64, now: DateTime<Utc>) -> Vec<UsageWindow> {
    windows.iter().filter(|w| w.is_exceeded(threshold, now)).cloned().collect()
}

pub fn evaluate_windows(windows: Vec<UsageWindow>, threshold: f64, now: DateTime<Utc>) -> WindowEvaluation {
    let exceeded = exceeded_windows(&windows, threshold, now);
    WindowEvaluation { windows, exceeded }
}

pub fn latest_future_reset(windows: &[UsageWindow], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    windows.iter().filter_map(|w| w.reset_at).filter(|reset| *reset > now).max()
}

/// Platform-agnostic evaluator over a [`UsageWindowSource`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaWindowMonitor {
    threshold: f64,
}

impl QuotaWindowMonitor {
    /// `threshold_percent` is clamped into 1..=100.
    pub fn new(threshold_percent: u32) -> Self {
        Self { threshold: f64::from(threshold_percent.clamp(1, 100)) }
    }

    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    pub async fn evaluate(
        &self,
        account: &Account,
        source: &dyn UsageWindowSource,
        now: DateTime<Utc>,
    ) -> Result<WindowEvaluation, UsageFetchError> {
        let windows = source.usage_windows(account, now).await?;
        Ok(evaluate_windows(windows, self.threshold, now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fluxpool_types::{CredentialType, Platform};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default()
    }

    struct FixedSource(Vec<UsageWindow>);

    #[async_trait::async_trait]
    impl UsageWindowSource for FixedSource {
        async fn usage_windows(
            &self,
            _account: &Account,
            _now: DateTime<Utc>,
        ) -> Result<Vec<UsageWindow>, UsageFetchError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_threshold_and_staleness() {
        let windows = vec![
            UsageWindow::new("5h", 99.0, Some(now() + Duration::hours(4))),
            UsageWindow::new("7d", 99.0, Some(now() - Duration::minutes(1))),
            UsageWindow::new("7d_sonnet", 79.9, Some(now() + Duration::hours(1))),
        ];
        let exceeded = exceeded_windows(&windows, 80.0, now());
        assert_eq!(exceeded.len(), 1);
        assert_eq!(exceeded[0].name, "5h");
    }

    #[test]
    fn test_unknown_reset_counts_as_exceeded_with_fallback() {
        let eval = evaluate_windows(vec![UsageWindow::new("5h", 100.0, None)], 100.0, now());
        assert!(eval.is_exceeded());
        assert_eq!(eval.resume_at(now(), Duration::minutes(5)), now() + Duration::minutes(5));
    }

    #[test]
    fn test_resume_at_picks_latest_future_reset() {
        let eval = evaluate_windows(
            vec![
                UsageWindow::new("5h", 100.0, Some(now() + Duration::hours(2))),
                UsageWindow::new("7d", 100.0, Some(now() + Duration::days(3))),
            ],
            100.0,
            now(),
        );
        assert_eq!(eval.resume_at(now(), Duration::minutes(5)), now() + Duration::days(3));
    }

    #[tokio::test]
    async fn test_monitor_reports_five_hour_overage() {
        let account = Account::new(1, Platform::Anthropic, CredentialType::OAuth);
        let source = FixedSource(vec![
            UsageWindow::new("5h", 99.0, Some(now() + Duration::hours(4))),
            UsageWindow::new("7d", 40.0, Some(now() + Duration::days(2))),
        ]);
        let eval = QuotaWindowMonitor::new(80).evaluate(&account, &source, now()).await.unwrap();
        assert_eq!(eval.windows.len(), 2);
        assert_eq!(eval.exceeded.len(), 1);
        assert_eq!(eval.resume_at(now(), Duration::minutes(5)), now() + Duration::hours(4));
    }

    #[test]
    fn test_threshold_is_clamped() {
        assert!((QuotaWindowMonitor::new(0).threshold() - 1.0).abs() < f64::EPSILON);
        assert!((QuotaWindowMonitor::new(500).threshold() - 100.0).abs() < f64::EPSILON);
    }
}
