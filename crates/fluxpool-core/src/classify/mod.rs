//! Upstream failure classification.
//!
//! ```text
//! status + headers + body
//!         │
//!         ├─ allowlist (apikey) ──────────────► Unchanged
//!         ├─ custom rule (≠429) ──────────────► TempUnschedulable(rule_index ≥ 0)
//!         ├─ 401 ─ hard signal? ─ yes ────────► Disabled
//!         │                     └ no ─────────► TempUnschedulable(rule_index = -1)
//!         ├─ 402 / 403 ───────────────────────► Disabled
//!         ├─ 429 ─ quota signal? ─ yes ───────► RateLimited(quota, reset | +30m)
//!         │                      └ no ────────► RateLimited(unified | headers | +5m)
//!         ├─ 529 ─────────────────────────────► Overloaded(+cooldown)
//!         └─ other 5xx ───────────────────────► Unchanged (log only)
//! ```
//!
//! Everything here is pure: no I/O, no clock reads, no panics.

pub mod auth_signal;
mod classifier;
pub mod error_body;
pub mod messages;
pub mod quota_signal;
pub mod reset;

pub use classifier::{
    classify, Classification, ClassifierSettings, HealthTransition, RateLimitKind, SkipReason,
    SESSION_WINDOW_HOURS,
};
pub use error_body::ErrorBody;

#[cfg(test)]
mod tests;
