//! Upstream failure taxonomy produced by the health state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How an upstream failure affects an account.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum HealthError {
    /// Self-healing pause: untrusted/OAuth 401, rate-limit 429, 529 overload
    #[error("Transient upstream error {status_code}; paused until {until}")]
    TransientUpstream {
        status_code: u16,
        until: DateTime<Utc>,
    },

    /// Permanent disable awaiting operator action: 402, 403, high-confidence 401
    #[error("Upstream rejected credentials ({status_code}): {message}")]
    AuthPermanent {
        status_code: u16,
        message: String,
    },

    /// Quota exhaustion; resolved by the recovery worker at `reset_at`
    #[error("Quota exceeded; resets at {reset_at}")]
    QuotaExceeded {
        reset_at: DateTime<Utc>,
    },
}

impl HealthError {
    /// Failures that clear themselves without operator action.
    pub const fn is_transient(&self) -> bool {
        !matches!(self, Self::AuthPermanent { .. })
    }

    /// Whether this failure ends with the account switched off.
    pub const fn disables_account(&self) -> bool {
        matches!(self, Self::AuthPermanent { .. })
    }
}
