//! Advisory-lock periodic job settings.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::recovery::default_true;

/// Cadence and toggles for the single-instance batch jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[allow(
    clippy::struct_excessive_bools,
    reason = "Configuration struct - bools are intentional feature flags"
)]
pub struct SchedulerConfig {
    #[serde(default = "default_true")]
    pub account_expiration_enabled: bool,
    #[validate(range(min = 5_u64, max = 86400_u64))]
    #[serde(default = "default_account_expiration_interval_secs")]
    pub account_expiration_interval_secs: u64,
    #[serde(default = "default_true")]
    pub subscription_expiration_enabled: bool,
    #[validate(range(min = 5_u64, max = 86400_u64))]
    #[serde(default = "default_subscription_expiration_interval_secs")]
    pub subscription_expiration_interval_secs: u64,
    /// Drains rows disabled on 429 by the older policy
    #[serde(default = "default_true")]
    pub rate_limit_reactivate_enabled: bool,
    #[validate(range(min = 5_u64, max = 86400_u64))]
    #[serde(default = "default_rate_limit_reactivate_interval_secs")]
    pub rate_limit_reactivate_interval_secs: u64,
    #[validate(range(min = 1_i64, max = 10000_i64))]
    #[serde(default = "default_rate_limit_reactivate_batch")]
    pub rate_limit_reactivate_batch: i64,
    #[serde(default = "default_true")]
    pub daily_usage_refresh_enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            account_expiration_enabled: true,
            account_expiration_interval_secs: default_account_expiration_interval_secs(),
            subscription_expiration_enabled: true,
            subscription_expiration_interval_secs: default_subscription_expiration_interval_secs(),
            rate_limit_reactivate_enabled: true,
            rate_limit_reactivate_interval_secs: default_rate_limit_reactivate_interval_secs(),
            rate_limit_reactivate_batch: default_rate_limit_reactivate_batch(),
            daily_usage_refresh_enabled: true,
        }
    }
}

pub const fn default_account_expiration_interval_secs() -> u64 {
    30
}

pub const fn default_subscription_expiration_interval_secs() -> u64 {
    60
}

pub const fn default_rate_limit_reactivate_interval_secs() -> u64 {
    30
}

pub const fn default_rate_limit_reactivate_batch() -> i64 {
    200
}
