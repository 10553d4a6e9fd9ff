//! Cache mirror of `TempUnschedState`, keyed by account id. Best effort: the
//! database stays authoritative.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxpool_types::TempUnschedState;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::CoordinationResult;

pub fn temp_unsched_cache_key(account_id: i64) -> String {
    format!("temp_unsched:account:{account_id}")
}

/// Seconds until `until_unix`, at least one.
fn ttl_secs(state: &TempUnschedState, now: DateTime<Utc>) -> u64 {
    u64::try_from(state.until_unix - now.timestamp()).unwrap_or_default().max(1)
}

#[async_trait]
pub trait TempUnschedCache: Send + Sync {
    async fn set(
        &self,
        account_id: i64,
        state: &TempUnschedState,
        now: DateTime<Utc>,
    ) -> CoordinationResult<()>;

    async fn get(&self, account_id: i64) -> CoordinationResult<Option<TempUnschedState>>;

    async fn delete(&self, account_id: i64) -> CoordinationResult<()>;
}

pub struct RedisTempUnschedCache {
    conn: ConnectionManager,
}

impl RedisTempUnschedCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TempUnschedCache for RedisTempUnschedCache {
    async fn set(
        &self,
        account_id: i64,
        state: &TempUnschedState,
        now: DateTime<Utc>,
    ) -> CoordinationResult<()> {
        let payload = serde_json::to_string(state)?;
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(temp_unsched_cache_key(account_id), payload, ttl_secs(state, now)).await?;
        Ok(())
    }

    async fn get(&self, account_id: i64) -> CoordinationResult<Option<TempUnschedState>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(temp_unsched_cache_key(account_id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, account_id: i64) -> CoordinationResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(temp_unsched_cache_key(account_id)).await?;
        Ok(())
    }
}

/// Process-local cache; entries expire at their `until_unix`.
#[derive(Default)]
pub struct MemoryTempUnschedCache {
    entries: Mutex<HashMap<i64, (TempUnschedState, DateTime<Utc>)>>,
}

impl MemoryTempUnschedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry, ignoring expiry.
    pub fn peek(&self, account_id: i64) -> Option<TempUnschedState> {
        self.entries.lock().get(&account_id).map(|(state, _)| state.clone())
    }

    /// Drop entries whose TTL ran out by `now`.
    pub fn expire(&self, now: DateTime<Utc>) {
        self.entries.lock().retain(|_, (_, expires)| *expires > now);
    }
}

#[async_trait]
impl TempUnschedCache for MemoryTempUnschedCache {
    async fn set(
        &self,
        account_id: i64,
        state: &TempUnschedState,
        now: DateTime<Utc>,
    ) -> CoordinationResult<()> {
        let expires = now + chrono::Duration::seconds(ttl_secs(state, now) as i64);
        self.entries.lock().insert(account_id, (state.clone(), expires));
        Ok(())
    }

    async fn get(&self, account_id: i64) -> CoordinationResult<Option<TempUnschedState>> {
        Ok(self.peek(account_id))
    }

    async fn delete(&self, account_id: i64) -> CoordinationResult<()> {
        self.entries.lock().remove(&account_id);
        Ok(())
    }
}
