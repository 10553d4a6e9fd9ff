//! Core domain models for the fluxpool gateway.
//!
//! Accounts, their health-state value objects, usage telemetry and configuration.

mod account;
pub mod config;
mod health;
mod usage;

// Re-export all models
pub use account::{Account, AccountStatus, CredentialType, CustomRule, Platform};
pub use config::{AppConfig, HealthConfig, RecoveryConfig, SchedulerConfig, UsageWindowConfig};
pub use health::{
    SessionWindow, SessionWindowStatus, TempUnschedState, RULE_INDEX_AUTH_COOLDOWN,
    RULE_INDEX_USAGE_WINDOW,
};
pub use usage::{UsageInfo, UsageProgress, UsageRefreshResult};
