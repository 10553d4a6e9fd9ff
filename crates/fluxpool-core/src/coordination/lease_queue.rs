//! Claim / process / resolve-or-retry work distribution over two ordered sets.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::CoordinationResult;

/// Lease used when the caller passes a non-positive one.
pub const DEFAULT_LEASE_SECS: i64 = 300;

/// Queue item: member id and its Unix-second score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseEntry {
    pub id: i64,
    pub due: DateTime<Utc>,
}

/// Sorted-set names for one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseKeys {
    pub pending: String,
    pub processing: String,
}

impl LeaseKeys {
    pub fn for_namespace(namespace: &str) -> Self {
        Self { pending: format!("{namespace}:pending"), processing: format!("{namespace}:processing") }
    }

    pub fn temp_unsched_recovery() -> Self {
        Self::for_namespace("temp_unsched_recovery")
    }
}

pub(crate) fn effective_lease(lease: Duration) -> Duration {
    if lease <= Duration::zero() {
        Duration::seconds(DEFAULT_LEASE_SECS)
    } else {
        lease
    }
}

/// Every member lives in at most one of `pending` / `processing`; each
/// operation moves members atomically.
#[async_trait]
pub trait LeaseQueue: Send + Sync {
    /// Upsert into `pending` at each entry's due score; members currently
    /// leased are left alone. Returns how many were written.
    async fn add_candidates(&self, entries: &[LeaseEntry]) -> CoordinationResult<usize>;

    /// Move up to `limit` due members from `pending` to `processing` at
    /// `now + lease`. Concurrent callers never receive the same member.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: Duration,
    ) -> CoordinationResult<Vec<i64>>;

    /// Return abandoned leases (score ≤ `now`) to `pending` at `now + retry_delay`.
    async fn requeue_expired(
        &self,
        now: DateTime<Utc>,
        retry_delay: Duration,
        limit: usize,
    ) -> CoordinationResult<usize>;

    /// Still unresolved: back to `pending` at `until`.
    async fn requeue(&self, id: i64, until: DateTime<Utc>) -> CoordinationResult<()>;

    /// Resolved: remove from both sets.
    async fn ack(&self, id: i64) -> CoordinationResult<()>;
}
