//! In-memory account repository with the same conditional-write semantics as
//! the PostgreSQL one. Every mutation is journalled for assertions.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fluxpool_types::{Account, AccountStatus, SessionWindow};
use parking_lot::Mutex;

use crate::modules::repository::{
    AccountRepository, RecoveryCandidate, RepoResult, RepositoryError,
};
use crate::quota_window::is_usage_quota_reason;
use crate::utils::Clock;

/// A recorded repository mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum RepoCall {
    SetRateLimited { id: i64, reset_at: DateTime<Utc> },
    ClearRateLimit { id: i64 },
    SetOverloaded { id: i64, until: DateTime<Utc> },
    SetTempUnschedulable { id: i64, until: DateTime<Utc>, reason: String },
    ClearTempUnschedulable { id: i64 },
    SetError { id: i64, message: String },
    SetUnschedulableWithReason { id: i64, reason: String },
    SetSchedulable { id: i64, schedulable: bool },
    UpdateSessionWindow { id: i64, window: SessionWindow },
    UpdateExtra { id: i64, keys: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySubscription {
    pub id: i64,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

pub struct InMemoryAccountRepository {
    accounts: DashMap<i64, Account>,
    subscriptions: DashMap<i64, MemorySubscription>,
    calls: Mutex<Vec<RepoCall>>,
    failing_ids: Mutex<HashSet<i64>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryAccountRepository {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: DashMap::new(),
            subscriptions: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            failing_ids: Mutex::new(HashSet::new()),
            clock,
        }
    }

    pub fn insert(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    pub fn insert_subscription(&self, subscription: MemorySubscription) {
        self.subscriptions.insert(subscription.id, subscription);
    }

    pub fn account(&self, id: i64) -> Option<Account> {
        self.accounts.get(&id).map(|a| a.clone())
    }

    pub fn subscription(&self, id: i64) -> Option<MemorySubscription> {
        self.subscriptions.get(&id).map(|s| s.clone())
    }

    pub fn calls(&self) -> Vec<RepoCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Make every operation on `id` fail with a database error.
    pub fn fail_for(&self, id: i64) {
        self.failing_ids.lock().insert(id);
    }

    pub fn heal(&self, id: i64) {
        self.failing_ids.lock().remove(&id);
    }

    fn record(&self, call: RepoCall) {
        self.calls.lock().push(call);
    }

    fn check(&self, id: i64) -> RepoResult<()> {
        if self.failing_ids.lock().contains(&id) {
            return Err(RepositoryError::Database(format!("injected failure for account {id}")));
        }
        Ok(())
    }

    fn mutate<T>(&self, id: i64, f: impl FnOnce(&mut Account) -> T) -> RepoResult<T> {
        self.check(id)?;
        let mut entry = self.accounts.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        Ok(f(entry.value_mut()))
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn get_by_id(&self, id: i64) -> RepoResult<Account> {
        self.check(id)?;
        self.account(id).ok_or(RepositoryError::NotFound(id))
    }

    async fn list_schedulable(&self) -> RepoResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .filter(|a| a.status == AccountStatus::Active && a.schedulable)
            .map(|a| a.clone())
            .collect();
        accounts.sort_by_key(|a| a.id);
        Ok(accounts)
    }

    async fn list_temp_unsched_recovery_candidates(
        &self,
        window_secs: i64,
    ) -> RepoResult<Vec<RecoveryCandidate>> {
        let horizon = self.now() + Duration::seconds(window_secs);
        let mut candidates: Vec<RecoveryCandidate> = self
            .accounts
            .iter()
            .filter(|a| is_usage_quota_reason(&a.temp_unschedulable_reason))
            .filter_map(|a| {
                a.temp_unschedulable_until
                    .filter(|until| *until <= horizon)
                    .map(|until| RecoveryCandidate { account_id: a.id, until })
            })
            .collect();
        candidates.sort_by_key(|c| c.until);
        Ok(candidates)
    }

    async fn list_rate_limit_reactivation_candidates(&self, limit: i64) -> RepoResult<Vec<Account>> {
        let now = self.now();
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .filter(|a| {
                a.status == AccountStatus::Active
                    && !a.schedulable
                    && a.rate_limit_reset_at.is_some_and(|reset| reset <= now)
                    && a.temp_unschedulable_reason.contains("429")
            })
            .map(|a| a.clone())
            .collect();
        accounts.sort_by_key(|a| a.rate_limit_reset_at);
        accounts.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(accounts)
    }

    async fn set_rate_limited(&self, id: i64, reset_at: DateTime<Utc>) -> RepoResult<()> {
        let now = self.now();
        self.mutate(id, |a| {
            if a.rate_limit_reset_at.map_or(true, |existing| existing <= now || existing < reset_at) {
                a.rate_limit_reset_at = Some(reset_at);
            }
        })?;
        self.record(RepoCall::SetRateLimited { id, reset_at });
        Ok(())
    }

    async fn clear_rate_limit(&self, id: i64) -> RepoResult<()> {
        self.mutate(id, |a| a.rate_limit_reset_at = None)?;
        self.record(RepoCall::ClearRateLimit { id });
        Ok(())
    }

    async fn set_overloaded(&self, id: i64, until: DateTime<Utc>) -> RepoResult<()> {
        self.mutate(id, |a| a.overloaded_until = Some(until))?;
        self.record(RepoCall::SetOverloaded { id, until });
        Ok(())
    }

    async fn set_temp_unschedulable(
        &self,
        id: i64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> RepoResult<bool> {
        let now = self.now();
        let applied = self.mutate(id, |a| {
            let applies = a
                .temp_unschedulable_until
                .map_or(true, |existing| existing <= now || existing < until);
            if applies {
                a.temp_unschedulable_until = Some(until);
                a.temp_unschedulable_reason = reason.to_string();
            }
            applies
        })?;
        self.record(RepoCall::SetTempUnschedulable { id, until, reason: reason.to_string() });
        Ok(applied)
    }

    async fn clear_temp_unschedulable(&self, id: i64) -> RepoResult<()> {
        self.mutate(id, |a| {
            a.temp_unschedulable_until = None;
            a.temp_unschedulable_reason.clear();
        })?;
        self.record(RepoCall::ClearTempUnschedulable { id });
        Ok(())
    }

    async fn set_error(&self, id: i64, message: &str) -> RepoResult<()> {
        self.mutate(id, |a| {
            a.status = AccountStatus::Error;
            a.schedulable = false;
            a.error_message = Some(message.to_string());
        })?;
        self.record(RepoCall::SetError { id, message: message.to_string() });
        Ok(())
    }

    async fn set_unschedulable_with_reason(&self, id: i64, reason: &str) -> RepoResult<()> {
        self.mutate(id, |a| {
            a.schedulable = false;
            a.error_message = Some(reason.to_string());
        })?;
        self.record(RepoCall::SetUnschedulableWithReason { id, reason: reason.to_string() });
        Ok(())
    }

    async fn set_schedulable(&self, id: i64, schedulable: bool) -> RepoResult<()> {
        self.mutate(id, |a| a.schedulable = schedulable)?;
        self.record(RepoCall::SetSchedulable { id, schedulable });
        Ok(())
    }

    async fn update_session_window(&self, id: i64, window: &SessionWindow) -> RepoResult<()> {
        self.mutate(id, |a| a.session_window = Some(*window))?;
        self.record(RepoCall::UpdateSessionWindow { id, window: *window });
        Ok(())
    }

    async fn update_extra(
        &self,
        id: i64,
        updates: &serde_json::Map<String, serde_json::Value>,
    ) -> RepoResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        self.mutate(id, |a| {
            for (key, value) in updates {
                a.extra.insert(key.clone(), value.clone());
            }
        })?;
        self.record(RepoCall::UpdateExtra { id, keys: updates.keys().cloned().collect() });
        Ok(())
    }

    async fn expire_accounts(&self) -> RepoResult<u64> {
        let now = self.now();
        let mut changed = 0;
        for mut entry in self.accounts.iter_mut() {
            let account = entry.value_mut();
            if account.schedulable && account.is_expired(now) {
                account.schedulable = false;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn expire_subscriptions(&self) -> RepoResult<u64> {
        let now = self.now();
        let mut changed = 0;
        for mut entry in self.subscriptions.iter_mut() {
            let sub = entry.value_mut();
            if sub.status == "active" && sub.expires_at <= now {
                sub.status = "expired".to_string();
                changed += 1;
            }
        }
        Ok(changed)
    }
}
