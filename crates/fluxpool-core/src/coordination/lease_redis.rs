//! Redis-backed lease queue. Every state transition is one Lua script, so a
//! member is never observed in both sets or claimed twice.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use redis::Script;

use super::lease_queue::{effective_lease, LeaseEntry, LeaseKeys, LeaseQueue};
use super::{CoordinationError, CoordinationResult};

const ADD_CANDIDATES_LUA: &str = r"
local added = 0
for i = 1, #ARGV, 2 do
    local id = ARGV[i + 1]
    if not redis.call('ZSCORE', KEYS[2], id) then
        redis.call('ZADD', KEYS[1], ARGV[i], id)
        added = added + 1
    end
end
return added
";

const CLAIM_DUE_LUA: &str = r"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(items) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('ZADD', KEYS[2], ARGV[3], id)
end
return items
";

const REQUEUE_EXPIRED_LUA: &str = r"
local items = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(items) do
    redis.call('ZREM', KEYS[2], id)
    redis.call('ZADD', KEYS[1], ARGV[3], id)
end
return #items
";

const REQUEUE_LUA: &str = r"
redis.call('ZREM', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
return 1
";

const ACK_LUA: &str = r"
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('ZREM', KEYS[2], ARGV[1])
return 1
";

struct LeaseScripts {
    add_candidates: Script,
    claim_due: Script,
    requeue_expired: Script,
    requeue: Script,
    ack: Script,
}

impl LeaseScripts {
    fn new() -> Self {
        Self {
            add_candidates: Script::new(ADD_CANDIDATES_LUA),
            claim_due: Script::new(CLAIM_DUE_LUA),
            requeue_expired: Script::new(REQUEUE_EXPIRED_LUA),
            requeue: Script::new(REQUEUE_LUA),
            ack: Script::new(ACK_LUA),
        }
    }
}

/// Lease queue over two Redis sorted sets.
pub struct RedisLeaseQueue {
    conn: ConnectionManager,
    keys: LeaseKeys,
    scripts: LeaseScripts,
}

impl RedisLeaseQueue {
    pub fn new(conn: ConnectionManager, keys: LeaseKeys) -> Self {
        Self { conn, keys, scripts: LeaseScripts::new() }
    }

    pub fn keys(&self) -> &LeaseKeys {
        &self.keys
    }
}

fn parse_ids(members: Vec<String>) -> CoordinationResult<Vec<i64>> {
    members
        .into_iter()
        .map(|m| {
            m.parse::<i64>()
                .map_err(|_| CoordinationError::Decode(format!("non-numeric lease member '{m}'")))
        })
        .collect()
}

#[async_trait]
impl LeaseQueue for RedisLeaseQueue {
    async fn add_candidates(&self, entries: &[LeaseEntry]) -> CoordinationResult<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let mut invocation = self.scripts.add_candidates.key(&self.keys.pending);
        invocation.key(&self.keys.processing);
        for entry in entries {
            invocation.arg(entry.due.timestamp()).arg(entry.id.to_string());
        }
        let added: i64 = invocation.invoke_async(&mut conn).await?;
        Ok(usize::try_from(added).unwrap_or_default())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> CoordinationResult<Vec<i64>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let lease_until = now + effective_lease(lease);
        let mut conn = self.conn.clone();
        let members: Vec<String> = self
            .scripts
            .claim_due
            .key(&self.keys.pending)
            .key(&self.keys.processing)
            .arg(now.timestamp())
            .arg(limit)
            .arg(lease_until.timestamp())
            .invoke_async(&mut conn)
            .await?;
        parse_ids(members)
    }

    async fn requeue_expired(
        &self,
        now: DateTime<Utc>,
        retry_delay: Duration,
        limit: usize,
    ) -> CoordinationResult<usize> {
        if limit == 0 {
            return Ok(0);
        }
        let retry_at = now + retry_delay.max(Duration::zero());
        let mut conn = self.conn.clone();
        let moved: i64 = self
            .scripts
            .requeue_expired
            .key(&self.keys.pending)
            .key(&self.keys.processing)
            .arg(now.timestamp())
            .arg(limit)
            .arg(retry_at.timestamp())
            .invoke_async(&mut conn)
            .await?;
        Ok(usize::try_from(moved).unwrap_or_default())
    }

    async fn requeue(&self, id: i64, until: DateTime<Utc>) -> CoordinationResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .scripts
            .requeue
            .key(&self.keys.pending)
            .key(&self.keys.processing)
            .arg(until.timestamp())
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ack(&self, id: i64) -> CoordinationResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .scripts
            .ack
            .key(&self.keys.pending)
            .key(&self.keys.processing)
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
