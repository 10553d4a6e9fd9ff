//! Top-level daemon configuration.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::health::{HealthConfig, UsageWindowConfig};
use super::recovery::RecoveryConfig;
use super::scheduler::SchedulerConfig;

/// Everything the daemon needs to run the health workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct AppConfig {
    /// Postgres connection string
    #[serde(default)]
    pub database_url: String,
    /// Redis connection string
    #[serde(default)]
    pub redis_url: String,
    /// Address for the health endpoints
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    #[validate(nested)]
    pub health: HealthConfig,
    #[serde(default)]
    #[validate(nested)]
    pub usage_window: UsageWindowConfig,
    #[serde(default)]
    #[validate(nested)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    #[validate(nested)]
    pub scheduler: SchedulerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            redis_url: String::new(),
            bind_address: default_bind_address(),
            health: HealthConfig::default(),
            usage_window: UsageWindowConfig::default(),
            recovery: RecoveryConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

pub fn default_bind_address() -> String {
    "127.0.0.1:8046".to_string()
}
