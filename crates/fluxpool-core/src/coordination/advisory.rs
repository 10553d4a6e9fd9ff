//! Single-instance periodic jobs via Postgres session advisory locks.
//!
//! The lock lives on a dedicated connection. If the holder dies the session
//! ends and Postgres releases the lock, so a crashed instance never blocks
//! later ticks. A lock that could not be released cleanly closes its
//! connection instead of returning it to the pool.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPool;
use sqlx::Postgres;

use super::{bounded, CoordinationError, CoordinationResult};

/// Periodic jobs, one fixed lock id each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvisoryJob {
    AccountExpiration,
    SubscriptionExpiration,
    DailyUsageRefresh,
    RateLimitReactivate,
}

impl AdvisoryJob {
    pub const fn lock_id(&self) -> i64 {
        match self {
            Self::AccountExpiration => 74_298_347_001,
            Self::SubscriptionExpiration => 74_298_347_002,
            Self::DailyUsageRefresh => 74_298_347_003,
            Self::RateLimitReactivate => 74_298_347_004,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::AccountExpiration => "account_expiration",
            Self::SubscriptionExpiration => "subscription_expiration",
            Self::DailyUsageRefresh => "daily_usage_refresh",
            Self::RateLimitReactivate => "rate_limit_reactivate",
        }
    }
}

/// A held lock. Must be released explicitly; dropping it only cleans up.
#[async_trait]
pub trait LockHandle: Send {
    async fn release(self: Box<Self>);
}

#[async_trait]
pub trait JobLocker: Send + Sync {
    /// `None` when another holder already has the lock.
    async fn try_lock(&self, job: AdvisoryJob) -> CoordinationResult<Option<Box<dyn LockHandle>>>;
}

/// Run `work` only if this instance wins `job`'s lock.
///
/// Returns `Ok(None)` when the tick was skipped. The lock is released on every
/// exit path, including when `work` overruns `budget`.
pub async fn run_exclusive<T, F, Fut>(
    locker: &dyn JobLocker,
    job: AdvisoryJob,
    budget: Duration,
    work: F,
) -> CoordinationResult<Option<T>>
where
    T: Send,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = T> + Send,
{
    let Some(handle) = locker.try_lock(job).await? else {
        tracing::debug!(job = job.name(), "[AdvisoryLock] lock held elsewhere, skipping tick");
        return Ok(None);
    };

    let outcome = tokio::time::timeout(budget, work()).await;
    handle.release().await;

    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(_) => Err(CoordinationError::Timeout { operation: job.name(), secs: budget.as_secs() }),
    }
}

pub struct PgAdvisoryLocker {
    pool: PgPool,
    acquire_timeout: Duration,
}

impl PgAdvisoryLocker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, acquire_timeout: Duration::from_secs(5) }
    }

    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

#[async_trait]
impl JobLocker for PgAdvisoryLocker {
    async fn try_lock(&self, job: AdvisoryJob) -> CoordinationResult<Option<Box<dyn LockHandle>>> {
        let lock_id = job.lock_id();
        let mut conn = bounded("advisory lock acquire", self.acquire_timeout, async {
            Ok(self.pool.acquire().await?)
        })
        .await?;

        let query = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
            .bind(lock_id)
            .fetch_one(&mut *conn);
        let acquired = match tokio::time::timeout(self.acquire_timeout, query).await {
            Ok(result) => result?,
            Err(_) => {
                // The lock may have been granted server-side; the session must not go back to the pool.
                conn.close_on_drop();
                return Err(CoordinationError::Timeout {
                    operation: "advisory lock",
                    secs: self.acquire_timeout.as_secs(),
                });
            },
        };
        if !acquired {
            return Ok(None);
        }
        let handle: Box<dyn LockHandle> = Box::new(PgLockHandle { conn: Some(conn), lock_id });
        Ok(Some(handle))
    }
}

struct PgLockHandle {
    conn: Option<PoolConnection<Postgres>>,
    lock_id: i64,
}

#[async_trait]
impl LockHandle for PgLockHandle {
    async fn release(mut self: Box<Self>) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        let unlock = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_id)
            .fetch_one(&mut *conn);
        match tokio::time::timeout(Duration::from_secs(5), unlock).await {
            Ok(Ok(true)) => {},
            Ok(Ok(false)) => {
                tracing::warn!(lock_id = self.lock_id, "[AdvisoryLock] unlock reported lock not held");
            },
            Ok(Err(e)) => {
                tracing::warn!(lock_id = self.lock_id, "[AdvisoryLock] unlock failed: {}", e);
                conn.close_on_drop();
            },
            Err(_) => {
                tracing::warn!(lock_id = self.lock_id, "[AdvisoryLock] unlock timed out");
                conn.close_on_drop();
            },
        }
    }
}

impl Drop for PgLockHandle {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.close_on_drop();
        }
    }
}

/// Process-local locker with the same skip semantics.
#[derive(Clone, Default)]
pub struct LocalJobLocker {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl LocalJobLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, job: AdvisoryJob) -> bool {
        self.held.lock().contains(&job.lock_id())
    }
}

#[async_trait]
impl JobLocker for LocalJobLocker {
    async fn try_lock(&self, job: AdvisoryJob) -> CoordinationResult<Option<Box<dyn LockHandle>>> {
        if !self.held.lock().insert(job.lock_id()) {
            return Ok(None);
        }
        let handle: Box<dyn LockHandle> =
            Box::new(LocalLockHandle { held: self.held.clone(), lock_id: Some(job.lock_id()) });
        Ok(Some(handle))
    }
}

struct LocalLockHandle {
    held: Arc<Mutex<HashSet<i64>>>,
    lock_id: Option<i64>,
}

#[async_trait]
impl LockHandle for LocalLockHandle {
    async fn release(mut self: Box<Self>) {
        if let Some(id) = self.lock_id.take() {
            self.held.lock().remove(&id);
        }
    }
}

impl Drop for LocalLockHandle {
    fn drop(&mut self) {
        if let Some(id) = self.lock_id.take() {
            self.held.lock().remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_ids_are_distinct() {
        let jobs = [
            AdvisoryJob::AccountExpiration,
            AdvisoryJob::SubscriptionExpiration,
            AdvisoryJob::DailyUsageRefresh,
            AdvisoryJob::RateLimitReactivate,
        ];
        let ids: HashSet<i64> = jobs.iter().map(AdvisoryJob::lock_id).collect();
        assert_eq!(ids.len(), jobs.len());
    }

    #[tokio::test]
    async fn test_second_holder_skips() {
        let locker = LocalJobLocker::new();
        let first = locker.try_lock(AdvisoryJob::AccountExpiration).await.unwrap();
        assert!(first.is_some());
        assert!(locker.try_lock(AdvisoryJob::AccountExpiration).await.unwrap().is_none());
        assert!(locker.try_lock(AdvisoryJob::SubscriptionExpiration).await.unwrap().is_some());

        if let Some(handle) = first {
            handle.release().await;
        }
        assert!(!locker.is_held(AdvisoryJob::AccountExpiration));
    }

    #[tokio::test]
    async fn test_run_exclusive_releases_after_work() {
        let locker = LocalJobLocker::new();
        let out = run_exclusive(&locker, AdvisoryJob::RateLimitReactivate, Duration::from_secs(1), || async {
            7
        })
        .await
        .unwrap();
        assert_eq!(out, Some(7));
        assert!(!locker.is_held(AdvisoryJob::RateLimitReactivate));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exclusive_releases_on_budget_overrun() {
        let locker = LocalJobLocker::new();
        let err = run_exclusive(&locker, AdvisoryJob::DailyUsageRefresh, Duration::from_secs(5), || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoordinationError::Timeout { .. }));
        assert!(!locker.is_held(AdvisoryJob::DailyUsageRefresh));
    }

    #[tokio::test]
    async fn test_run_exclusive_skips_when_held() {
        let locker = LocalJobLocker::new();
        let _held = locker.try_lock(AdvisoryJob::AccountExpiration).await.unwrap();
        let out = run_exclusive(&locker, AdvisoryJob::AccountExpiration, Duration::from_secs(1), || async {
            panic!("must not run")
        })
        .await
        .unwrap();
        assert_eq!(out, None::<()>);
    }
}
