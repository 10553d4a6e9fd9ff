//! Temp-unschedulable recovery worker settings.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Intervals for the refresh/poll pair driving lease-queue recovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct RecoveryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Database scan cadence for new candidates
    #[validate(range(min = 60_u64, max = 86400_u64))]
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Lease-queue poll cadence; the claim lease is twice this
    #[validate(range(min = 5_u64, max = 3600_u64))]
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Look-ahead applied to `temp_unschedulable_until` when scanning
    #[validate(range(min = 60_u64, max = 604800_u64))]
    #[serde(default = "default_refresh_window_secs")]
    pub refresh_window_secs: u64,
    /// Backoff for failed or still-unknown checks
    #[validate(range(min = 1_u64, max = 86400_u64))]
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[validate(range(min = 1_usize, max = 10000_usize))]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl RecoveryConfig {
    /// Claim lease: twice the poll interval, never under a minute.
    pub fn lease_secs(&self) -> u64 {
        (self.poll_interval_secs * 2).max(60)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refresh_interval_secs: default_refresh_interval_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            refresh_window_secs: default_refresh_window_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            batch_size: default_batch_size(),
        }
    }
}

pub(crate) const fn default_true() -> bool {
    true
}

pub const fn default_refresh_interval_secs() -> u64 {
    3600
}

pub const fn default_poll_interval_secs() -> u64 {
    300
}

pub const fn default_refresh_window_secs() -> u64 {
    3600
}

pub const fn default_retry_delay_secs() -> u64 {
    300
}

pub const fn default_batch_size() -> usize {
    200
}
