//! Typed error definitions for fluxpool.
//!
//! All errors are serializable for API responses, displayable for logs and
//! matchable for control flow.

mod config;
mod health;

pub use config::ConfigError;
pub use health::HealthError;
