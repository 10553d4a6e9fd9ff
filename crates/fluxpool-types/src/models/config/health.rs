//! Classification and usage-window settings.

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Cooldowns applied by the upstream error classifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct HealthConfig {
    /// Pause applied to a 401 that is not a high-confidence credential failure
    #[validate(range(min = 1_u64, max = 86400_u64))]
    #[serde(default = "default_auth_401_cooldown_secs")]
    pub auth_401_cooldown_secs: u64,
    /// Pause applied on 529 overload
    #[validate(range(min = 1_u64, max = 1440_u64))]
    #[serde(default = "default_overload_cooldown_minutes")]
    pub overload_cooldown_minutes: u64,
    /// Quota-exceeded 429 pause when no reset is advertised
    #[validate(range(min = 1_u64, max = 10080_u64))]
    #[serde(default = "default_quota_fallback_minutes")]
    pub quota_fallback_minutes: u64,
    /// Plain rate-limit 429 pause when no reset is advertised
    #[validate(range(min = 1_u64, max = 1440_u64))]
    #[serde(default = "default_rate_limit_fallback_minutes")]
    pub rate_limit_fallback_minutes: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            auth_401_cooldown_secs: default_auth_401_cooldown_secs(),
            overload_cooldown_minutes: default_overload_cooldown_minutes(),
            quota_fallback_minutes: default_quota_fallback_minutes(),
            rate_limit_fallback_minutes: default_rate_limit_fallback_minutes(),
        }
    }
}

/// Usage-window evaluation and the daily refresh schedule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct UsageWindowConfig {
    /// A window at or above this utilization counts as exceeded
    #[validate(range(min = 1_u32, max = 100_u32))]
    #[serde(default = "default_disable_percent")]
    pub disable_percent: u32,
    /// Pause used when an exceeded window has no usable reset time
    #[validate(range(min = 1_u64, max = 86400_u64))]
    #[serde(default = "default_usage_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Local time-of-day for the daily usage refresh, `HH:MM`
    #[validate(custom(function = "validate_daily_time"))]
    #[serde(default = "default_daily_refresh_time")]
    pub daily_refresh_time: String,
    /// Accounts refreshed in parallel
    #[validate(range(min = 1_usize, max = 64_usize))]
    #[serde(default = "default_refresh_concurrency")]
    pub refresh_concurrency: usize,
    #[validate(range(min = 1_u64, max = 600_u64))]
    #[serde(default = "default_per_account_timeout_secs")]
    pub per_account_timeout_secs: u64,
}

impl Default for UsageWindowConfig {
    fn default() -> Self {
        Self {
            disable_percent: default_disable_percent(),
            cooldown_secs: default_usage_cooldown_secs(),
            daily_refresh_time: default_daily_refresh_time(),
            refresh_concurrency: default_refresh_concurrency(),
            per_account_timeout_secs: default_per_account_timeout_secs(),
        }
    }
}

/// Parse `HH:MM` into hour and minute.
pub fn parse_daily_time(value: &str) -> Option<(u32, u32)> {
    let (hour, minute) = value.trim().split_once(':')?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    (hour <= 23 && minute <= 59).then_some((hour, minute))
}

fn validate_daily_time(value: &str) -> Result<(), ValidationError> {
    parse_daily_time(value).map(|_| ()).ok_or_else(|| ValidationError::new("daily_time"))
}

pub const fn default_auth_401_cooldown_secs() -> u64 {
    300
}

pub const fn default_overload_cooldown_minutes() -> u64 {
    10
}

pub const fn default_quota_fallback_minutes() -> u64 {
    30
}

pub const fn default_rate_limit_fallback_minutes() -> u64 {
    5
}

pub const fn default_disable_percent() -> u32 {
    100
}

pub const fn default_usage_cooldown_secs() -> u64 {
    300
}

pub fn default_daily_refresh_time() -> String {
    "03:00".to_string()
}

pub const fn default_refresh_concurrency() -> usize {
    5
}

pub const fn default_per_account_timeout_secs() -> u64 {
    30
}
