//! # Fluxpool Types
//!
//! Core types, models, and error definitions for the fluxpool account-pool gateway.
//!
//! - **`error`** - Typed errors for health transitions and configuration
//! - **`models`** - Domain models (Account, TempUnschedState, UsageInfo, config)
//!
//! ## Architecture Role
//!
//! `fluxpool-types` sits at the bottom of the dependency graph:
//!
//! ```text
//!      fluxpool-types (this crate)
//!              │
//!              ▼
//!        fluxpool-core
//!              │
//!              ▼
//!       fluxpool-server
//! ```

pub mod error;
pub mod models;

// Re-export error types for convenience
pub use error::{ConfigError, HealthError};

// Re-export core model types
pub use models::{
    Account, AccountStatus, AppConfig, CredentialType, CustomRule, HealthConfig, Platform,
    RecoveryConfig, SchedulerConfig, SessionWindow, SessionWindowStatus, TempUnschedState,
    UsageInfo, UsageProgress, UsageRefreshResult, UsageWindowConfig, RULE_INDEX_AUTH_COOLDOWN,
    RULE_INDEX_USAGE_WINDOW,
};
