//! PostgreSQL implementation of the account repository.

use crate::modules::account_pg_batch::{expire_accounts_impl, expire_subscriptions_impl};
use crate::modules::account_pg_query::{
    get_by_id_impl, list_rate_limit_reactivation_candidates_impl, list_schedulable_impl,
    list_temp_unsched_recovery_candidates_impl,
};
use crate::modules::account_pg_targeted::{
    clear_rate_limit_impl, clear_temp_unschedulable_impl, set_error_impl, set_overloaded_impl,
    set_rate_limited_impl, set_schedulable_impl, set_temp_unschedulable_impl,
    set_unschedulable_with_reason_impl, update_extra_impl, update_session_window_impl,
};
use crate::modules::repository::{
    AccountRepository, RecoveryCandidate, RepoResult, RepositoryError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxpool_types::{Account, SessionWindow};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// PostgreSQL-backed account repository.
#[derive(Clone)]
pub struct PostgresAccountRepository {
    /// Database connection pool.
    pool: PgPool,
}

impl PostgresAccountRepository {
    /// Create repository with existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connect to database and create repository.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(300))
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> RepoResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| RepositoryError::Database(err.to_string()))
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn get_by_id(&self, id: i64) -> RepoResult<Account> {
        get_by_id_impl(&self.pool, id).await
    }

    async fn list_schedulable(&self) -> RepoResult<Vec<Account>> {
        list_schedulable_impl(&self.pool).await
    }

    async fn list_temp_unsched_recovery_candidates(
        &self,
        window_secs: i64,
    ) -> RepoResult<Vec<RecoveryCandidate>> {
        list_temp_unsched_recovery_candidates_impl(&self.pool, window_secs).await
    }

    async fn list_rate_limit_reactivation_candidates(&self, limit: i64) -> RepoResult<Vec<Account>> {
        list_rate_limit_reactivation_candidates_impl(&self.pool, limit).await
    }

    async fn set_rate_limited(&self, id: i64, reset_at: DateTime<Utc>) -> RepoResult<()> {
        set_rate_limited_impl(&self.pool, id, reset_at).await
    }

    async fn clear_rate_limit(&self, id: i64) -> RepoResult<()> {
        clear_rate_limit_impl(&self.pool, id).await
    }

    async fn set_overloaded(&self, id: i64, until: DateTime<Utc>) -> RepoResult<()> {
        set_overloaded_impl(&self.pool, id, until).await
    }

    async fn set_temp_unschedulable(
        &self,
        id: i64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> RepoResult<bool> {
        set_temp_unschedulable_impl(&self.pool, id, until, reason).await
    }

    async fn clear_temp_unschedulable(&self, id: i64) -> RepoResult<()> {
        clear_temp_unschedulable_impl(&self.pool, id).await
    }

    async fn set_error(&self, id: i64, message: &str) -> RepoResult<()> {
        set_error_impl(&self.pool, id, message).await
    }

    async fn set_unschedulable_with_reason(&self, id: i64, reason: &str) -> RepoResult<()> {
        set_unschedulable_with_reason_impl(&self.pool, id, reason).await
    }

    async fn set_schedulable(&self, id: i64, schedulable: bool) -> RepoResult<()> {
        set_schedulable_impl(&self.pool, id, schedulable).await
    }

    async fn update_session_window(&self, id: i64, window: &SessionWindow) -> RepoResult<()> {
        update_session_window_impl(&self.pool, id, window).await
    }

    async fn update_extra(
        &self,
        id: i64,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> RepoResult<()> {
        update_extra_impl(&self.pool, id, updates).await
    }

    async fn expire_accounts(&self) -> RepoResult<u64> {
        expire_accounts_impl(&self.pool).await
    }

    async fn expire_subscriptions(&self) -> RepoResult<u64> {
        expire_subscriptions_impl(&self.pool).await
    }
}
