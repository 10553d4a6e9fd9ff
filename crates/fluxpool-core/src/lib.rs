//! # Fluxpool Core
//!
//! Account health state machine for the fluxpool account-pool gateway.
//!
//! ## Architecture
//!
//! ```text
//! fluxpool-core/src/
//! ├── classify/       # upstream failure → health transition (pure)
//! ├── custom_rules.rs # per-account status/keyword overrides
//! ├── quota_window/   # usage-window evaluation, Codex snapshot normalisation
//! ├── health/         # AccountHealthService: applies transitions, cache mirror
//! ├── modules/        # AccountRepository: PostgreSQL + in-memory
//! ├── coordination/   # Redis lease queue, temp-unsched cache, advisory locks
//! └── workers/        # recovery, expiration, reactivation, daily refresh
//! ```
//!
//! Classification and window evaluation never do I/O. Everything that touches
//! PostgreSQL or Redis sits behind a trait with an in-memory twin for tests.

#![allow(
    clippy::significant_drop_tightening,
    reason = "parking_lot guards in short synchronous sections"
)]
#![allow(
    clippy::wildcard_enum_match_arm,
    reason = "Platform and status matches fall back to a generic branch"
)]
#![allow(clippy::map_err_ignore, reason = "Error context is provided in the replacement message")]
#![allow(clippy::needless_continue, reason = "Explicit continue improves loop readability")]
#![allow(
    clippy::derive_partial_eq_without_eq,
    reason = "Some types intentionally don't implement Eq"
)]
// Test-only lints: allow panic!, println!, etc. in test code
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::float_cmp,
        clippy::unwrap_used,
        clippy::needless_collect,
        clippy::assertions_on_result_states
    )
)]

pub mod classify;
pub mod coordination;
pub mod custom_rules;
pub mod error;
pub mod health;
pub mod modules;
pub mod quota_window;
pub mod utils;
pub mod workers;

// Re-export commonly used types
pub use classify::{classify, Classification, ClassifierSettings, HealthTransition};
pub use error::{AppError, AppResult};
pub use health::AccountHealthService;
pub use quota_window::{QuotaWindowMonitor, UsageWindow, WindowEvaluation};
