//! Re-enables accounts an older release switched off on 429.
//!
//! The current classifier never unschedules on 429, so this sweep only drains
//! rows written before that change.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fluxpool_types::{Account, AccountStatus};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::lifecycle::run_periodic;
use crate::coordination::{run_exclusive, AdvisoryJob, JobLocker};
use crate::error::AppResult;
use crate::modules::repository::AccountRepository;
use crate::utils::Clock;

const REACTIVATE_BUDGET: Duration = Duration::from_secs(30);

pub struct RateLimitReactivateWorker {
    repo: Arc<dyn AccountRepository>,
    locker: Arc<dyn JobLocker>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    batch: i64,
}

/// Row still qualifies after a fresh read.
fn should_reactivate(account: &Account, now: DateTime<Utc>) -> bool {
    account.status == AccountStatus::Active
        && !account.schedulable
        && !account.is_expired(now)
        && account.rate_limit_reset_at.is_some_and(|reset| reset <= now)
        && account.temp_unschedulable_reason.contains("429")
}

impl RateLimitReactivateWorker {
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        locker: Arc<dyn JobLocker>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        batch: i64,
    ) -> Self {
        Self { repo, locker, clock, interval, batch: batch.max(1) }
    }

    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = self.interval;
        tokio::spawn(run_periodic(AdvisoryJob::RateLimitReactivate.name(), interval, true, shutdown, move || {
            let worker = Arc::clone(&self);
            async move {
                if let Err(e) = worker.run_once().await {
                    tracing::warn!(error = %e, "[RateLimitReactivate] sweep failed");
                }
            }
        }))
    }

    /// One sweep. `Ok(None)` when another instance holds the lock.
    pub async fn run_once(&self) -> AppResult<Option<usize>> {
        let outcome =
            run_exclusive(self.locker.as_ref(), AdvisoryJob::RateLimitReactivate, REACTIVATE_BUDGET, || {
                self.reactivate_batch()
            })
            .await?;
        outcome.transpose()
    }

    async fn reactivate_batch(&self) -> AppResult<usize> {
        let candidates = self.repo.list_rate_limit_reactivation_candidates(self.batch).await?;
        let mut reactivated = 0;

        for candidate in candidates {
            let id = candidate.id;
            let fresh = match self.repo.get_by_id(id).await {
                Ok(account) => account,
                Err(e) => {
                    tracing::warn!(account_id = id, error = %e, "[RateLimitReactivate] reload failed");
                    continue;
                },
            };
            if !should_reactivate(&fresh, self.clock.now()) {
                continue;
            }
            match self.repo.set_schedulable(id, true).await {
                Ok(()) => {
                    reactivated += 1;
                    tracing::info!(account_id = id, "[RateLimitReactivate] account re-enabled");
                },
                Err(e) => {
                    tracing::warn!(account_id = id, error = %e, "[RateLimitReactivate] re-enable failed");
                },
            }
        }
        Ok(reactivated)
    }
}
