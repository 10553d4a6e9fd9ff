//! Account repository trait for storage abstraction.
//!
//! Only the health-related subset of account persistence lives here. Cooldown
//! writes are conditional: `set_rate_limited` and `set_temp_unschedulable`
//! never shorten a timestamp that is still in the future.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxpool_types::{Account, SessionWindow};

pub type RepoResult<T> = Result<T, RepositoryError>;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Account not found: {0}")]
    NotFound(i64),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Account whose usage-quota pause ends inside the look-ahead window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryCandidate {
    pub account_id: i64,
    pub until: DateTime<Utc>,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> RepoResult<Account>;

    /// Active, schedulable, not deleted.
    async fn list_schedulable(&self) -> RepoResult<Vec<Account>>;

    async fn list_temp_unsched_recovery_candidates(
        &self,
        window_secs: i64,
    ) -> RepoResult<Vec<RecoveryCandidate>>;

    /// Rows an older policy switched off on 429 whose reset has passed.
    async fn list_rate_limit_reactivation_candidates(&self, limit: i64) -> RepoResult<Vec<Account>>;

    /// Extend-only on `rate_limit_reset_at`; `schedulable` is untouched.
    async fn set_rate_limited(&self, id: i64, reset_at: DateTime<Utc>) -> RepoResult<()>;

    async fn clear_rate_limit(&self, id: i64) -> RepoResult<()>;

    async fn set_overloaded(&self, id: i64, until: DateTime<Utc>) -> RepoResult<()>;

    /// Extend-only. Returns `false` when a longer pause was kept.
    async fn set_temp_unschedulable(
        &self,
        id: i64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> RepoResult<bool>;

    async fn clear_temp_unschedulable(&self, id: i64) -> RepoResult<()>;

    /// Permanent disable: status `error`, not schedulable.
    async fn set_error(&self, id: i64, message: &str) -> RepoResult<()>;

    async fn set_unschedulable_with_reason(&self, id: i64, reason: &str) -> RepoResult<()>;

    async fn set_schedulable(&self, id: i64, schedulable: bool) -> RepoResult<()>;

    async fn update_session_window(&self, id: i64, window: &SessionWindow) -> RepoResult<()>;

    /// Shallow merge into `extra`.
    async fn update_extra(
        &self,
        id: i64,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> RepoResult<()>;

    /// Switch off accounts whose credentials expired. Returns rows changed.
    async fn expire_accounts(&self) -> RepoResult<u64>;

    /// Mark lapsed subscriptions expired. Returns rows changed.
    async fn expire_subscriptions(&self) -> RepoResult<u64>;
}
