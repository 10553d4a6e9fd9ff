//! Shared handles for the health endpoints.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use sqlx::PgPool;

use fluxpool_core::workers::DailyUsageRefreshWorker;

const READINESS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pool: PgPool,
    redis: ConnectionManager,
    daily_refresh: Option<Arc<DailyUsageRefreshWorker>>,
}

/// Outcome of one dependency ping.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DependencyStatus {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyStatus {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(error) => Self { ok: false, error: Some(error) },
        }
    }
}

impl AppState {
    pub fn new(
        pool: PgPool,
        redis: ConnectionManager,
        daily_refresh: Option<Arc<DailyUsageRefreshWorker>>,
    ) -> Self {
        Self { inner: Arc::new(AppStateInner { pool, redis, daily_refresh }) }
    }

    pub fn daily_refresh(&self) -> Option<&Arc<DailyUsageRefreshWorker>> {
        self.inner.daily_refresh.as_ref()
    }

    pub async fn ping_postgres(&self) -> DependencyStatus {
        let ping = sqlx::query("SELECT 1").execute(&self.inner.pool);
        let result = match tokio::time::timeout(READINESS_TIMEOUT, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("timed out".to_string()),
        };
        DependencyStatus::from_result(result)
    }

    pub async fn ping_redis(&self) -> DependencyStatus {
        let mut conn = self.inner.redis.clone();
        let ping = async move {
            let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok::<_, redis::RedisError>(pong)
        };
        let result = match tokio::time::timeout(READINESS_TIMEOUT, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("timed out".to_string()),
        };
        DependencyStatus::from_result(result)
    }
}
