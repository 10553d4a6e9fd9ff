//! Cross-instance coordination: lease queue, temp-unschedulable cache mirror
//! and advisory-lock job runner.
//!
//! ```text
//!   gateway A ─┐                        ┌─ pending    (ZSET id → due)
//!   gateway B ─┼─► Redis (Lua scripts) ─┤
//!   gateway N ─┘                        └─ processing (ZSET id → lease end)
//!
//!   gateway * ─► Postgres pg_try_advisory_lock(job) ─► one batch per tick
//! ```

mod advisory;
mod lease_memory;
mod lease_queue;
mod lease_redis;
mod temp_cache;

pub use advisory::{
    run_exclusive, AdvisoryJob, JobLocker, LocalJobLocker, LockHandle, PgAdvisoryLocker,
};
pub use lease_memory::MemoryLeaseQueue;
pub use lease_queue::{LeaseEntry, LeaseKeys, LeaseQueue, DEFAULT_LEASE_SECS};
pub use lease_redis::RedisLeaseQueue;
pub use temp_cache::{
    temp_unsched_cache_key, MemoryTempUnschedCache, RedisTempUnschedCache, TempUnschedCache,
};

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub type CoordinationResult<T> = Result<T, CoordinationError>;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<redis::RedisError> for CoordinationError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<sqlx::Error> for CoordinationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for CoordinationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Bound a coordination call.
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> CoordinationResult<T>
where
    F: Future<Output = CoordinationResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(CoordinationError::Timeout { operation, secs: limit.as_secs() }),
    }
}
