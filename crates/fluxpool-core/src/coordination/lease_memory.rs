//! Single-process lease queue with the same semantics as the Redis one.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::lease_queue::{effective_lease, LeaseEntry, LeaseQueue};
use super::CoordinationResult;

#[derive(Default)]
struct Sets {
    pending: HashMap<i64, i64>,
    processing: HashMap<i64, i64>,
}

/// Take up to `limit` members with score ≤ `max_score`, lowest score first.
fn take_due(set: &mut HashMap<i64, i64>, max_score: i64, limit: usize) -> Vec<i64> {
    let mut due: Vec<(i64, i64)> =
        set.iter().filter(|(_, score)| **score <= max_score).map(|(id, score)| (*score, *id)).collect();
    due.sort_unstable();
    due.truncate(limit);
    due.into_iter()
        .map(|(_, id)| {
            set.remove(&id);
            id
        })
        .collect()
}

#[derive(Default)]
pub struct MemoryLeaseQueue {
    sets: Mutex<Sets>,
}

impl MemoryLeaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_score(&self, id: i64) -> Option<i64> {
        self.sets.lock().pending.get(&id).copied()
    }

    pub fn processing_score(&self, id: i64) -> Option<i64> {
        self.sets.lock().processing.get(&id).copied()
    }

    pub fn pending_len(&self) -> usize {
        self.sets.lock().pending.len()
    }

    pub fn processing_len(&self) -> usize {
        self.sets.lock().processing.len()
    }
}

#[async_trait]
impl LeaseQueue for MemoryLeaseQueue {
    async fn add_candidates(&self, entries: &[LeaseEntry]) -> CoordinationResult<usize> {
        let mut sets = self.sets.lock();
        let mut added = 0;
        for entry in entries {
            if sets.processing.contains_key(&entry.id) {
                continue;
            }
            sets.pending.insert(entry.id, entry.due.timestamp());
            added += 1;
        }
        Ok(added)
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
        let lease_until = (now + effective_lease(lease)).timestamp();
        let mut sets = self.sets.lock();
        let claimed = take_due(&mut sets.pending, now.timestamp(), limit);
        for id in &claimed {
            sets.processing.insert(*id, lease_until);
        }
        Ok(claimed)
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
        let retry_at = (now + retry_delay.max(Duration::zero())).timestamp();
        let mut sets = self.sets.lock();
        let expired = take_due(&mut sets.processing, now.timestamp(), limit);
        for id in &expired {
            sets.pending.insert(*id, retry_at);
        }
        Ok(expired.len())
    }

    async fn requeue(&self, id: i64, until: DateTime<Utc>) -> CoordinationResult<()> {
        let mut sets = self.sets.lock();
        sets.processing.remove(&id);
        sets.pending.insert(id, until.timestamp());
        Ok(())
    }

    async fn ack(&self, id: i64) -> CoordinationResult<()> {
        let mut sets = self.sets.lock();
        sets.pending.remove(&id);
        sets.processing.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::DEFAULT_LEASE_SECS;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }

    fn entries(ids: impl IntoIterator<Item = i64>, due: i64) -> Vec<LeaseEntry> {
        ids.into_iter().map(|id| LeaseEntry { id, due: at(due) }).collect()
    }

    #[tokio::test]
    async fn test_claim_respects_limit_and_moves_to_processing() {
        let queue = MemoryLeaseQueue::new();
        queue.add_candidates(&entries(1..=5, 100)).await.unwrap();
        queue.add_candidates(&entries([9], 500)).await.unwrap();

        let claimed = queue.claim_due(at(200), 3, Duration::seconds(60)).await.unwrap();
        assert_eq!(claimed.len(), 3);
        for id in &claimed {
            assert_eq!(queue.pending_score(*id), None);
            assert_eq!(queue.processing_score(*id), Some(260));
        }
        assert_eq!(queue.pending_score(9), Some(500));
        assert!(queue.claim_due(at(200), 0, Duration::seconds(60)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_positive_lease_uses_default() {
        let queue = MemoryLeaseQueue::new();
        queue.add_candidates(&entries([1], 100)).await.unwrap();
        queue.claim_due(at(100), 10, Duration::zero()).await.unwrap();
        assert_eq!(queue.processing_score(1), Some(100 + DEFAULT_LEASE_SECS));
    }

    #[tokio::test]
    async fn test_requeue_expired_only_touches_expired_leases() {
        let queue = MemoryLeaseQueue::new();
        queue.add_candidates(&entries([1], 100)).await.unwrap();
        queue.claim_due(at(100), 10, Duration::seconds(50)).await.unwrap();
        queue.add_candidates(&entries([2], 100)).await.unwrap();
        queue.claim_due(at(140), 10, Duration::seconds(50)).await.unwrap();

        let moved = queue.requeue_expired(at(160), Duration::seconds(30), 10).await.unwrap();
        assert_eq!(moved, 1);
        assert_eq!(queue.pending_score(1), Some(190));
        assert_eq!(queue.processing_score(1), None);
        assert_eq!(queue.processing_score(2), Some(190));
    }

    #[tokio::test]
    async fn test_requeue_and_ack() {
        let queue = MemoryLeaseQueue::new();
        queue.add_candidates(&entries([1, 2], 100)).await.unwrap();
        queue.claim_due(at(100), 10, Duration::seconds(60)).await.unwrap();

        queue.requeue(1, at(900)).await.unwrap();
        assert_eq!(queue.pending_score(1), Some(900));
        assert_eq!(queue.processing_score(1), None);

        queue.ack(2).await.unwrap();
        assert_eq!(queue.pending_score(2), None);
        assert_eq!(queue.processing_score(2), None);
    }

    #[tokio::test]
    async fn test_leased_members_are_not_re_added() {
        let queue = MemoryLeaseQueue::new();
        queue.add_candidates(&entries([1], 100)).await.unwrap();
        queue.claim_due(at(100), 10, Duration::seconds(60)).await.unwrap();
        assert_eq!(queue.add_candidates(&entries([1], 50)).await.unwrap(), 0);
        assert_eq!(queue.pending_score(1), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_overlap() {
        let queue = Arc::new(MemoryLeaseQueue::new());
        queue.add_candidates(&entries(1..=200, 100)).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    let mut mine = Vec::new();
                    loop {
                        let batch = queue.claim_due(at(100), 7, Duration::seconds(60)).await.unwrap();
                        if batch.is_empty() {
                            break;
                        }
                        mine.extend(batch);
                    }
                    mine
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "id {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 200);
        assert_eq!(queue.processing_len(), 200);
    }
}
