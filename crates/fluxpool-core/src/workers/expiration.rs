//! Account and subscription expiration sweeps, one instance per tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::lifecycle::run_periodic;
use crate::coordination::{run_exclusive, AdvisoryJob, JobLocker};
use crate::error::AppResult;
use crate::modules::repository::AccountRepository;

/// Time allowed for one sweep statement.
pub const SWEEP_BUDGET: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationTarget {
    /// `accounts.schedulable = FALSE` once `expires_at` passed
    Accounts,
    /// `user_subscriptions.status = 'expired'` once `expires_at` passed
    Subscriptions,
}

impl ExpirationTarget {
    pub const fn job(&self) -> AdvisoryJob {
        match self {
            Self::Accounts => AdvisoryJob::AccountExpiration,
            Self::Subscriptions => AdvisoryJob::SubscriptionExpiration,
        }
    }

    const fn tag(&self) -> &'static str {
        match self {
            Self::Accounts => "[AccountExpiration]",
            Self::Subscriptions => "[SubscriptionExpiration]",
        }
    }
}

pub struct ExpirationWorker {
    target: ExpirationTarget,
    repo: Arc<dyn AccountRepository>,
    locker: Arc<dyn JobLocker>,
    interval: Duration,
}

impl ExpirationWorker {
    pub fn new(
        target: ExpirationTarget,
        repo: Arc<dyn AccountRepository>,
        locker: Arc<dyn JobLocker>,
        interval: Duration,
    ) -> Self {
        Self { target, repo, locker, interval }
    }

    pub fn accounts(repo: Arc<dyn AccountRepository>, locker: Arc<dyn JobLocker>, interval: Duration) -> Self {
        Self::new(ExpirationTarget::Accounts, repo, locker, interval)
    }

    pub fn subscriptions(
        repo: Arc<dyn AccountRepository>,
        locker: Arc<dyn JobLocker>,
        interval: Duration,
    ) -> Self {
        Self::new(ExpirationTarget::Subscriptions, repo, locker, interval)
    }

    pub const fn target(&self) -> ExpirationTarget {
        self.target
    }

    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let interval = self.interval;
        let name = self.target.job().name();
        tokio::spawn(run_periodic(name, interval, true, shutdown, move || {
            let worker = Arc::clone(&self);
            async move {
                if let Err(e) = worker.run_once().await {
                    tracing::warn!(job = name, error = %e, "{} sweep failed", worker.target.tag());
                }
            }
        }))
    }

    /// One sweep. `Ok(None)` when another instance holds the lock.
    pub async fn run_once(&self) -> AppResult<Option<u64>> {
        let job = self.target.job();
        let repo = Arc::clone(&self.repo);
        let target = self.target;
        let outcome = run_exclusive(self.locker.as_ref(), job, SWEEP_BUDGET, || async move {
            match target {
                ExpirationTarget::Accounts => repo.expire_accounts().await,
                ExpirationTarget::Subscriptions => repo.expire_subscriptions().await,
            }
        })
        .await?;

        let Some(result) = outcome else {
            return Ok(None);
        };
        let changed = result?;
        if changed > 0 {
            tracing::info!(job = job.name(), changed, "{} rows expired", self.target.tag());
        }
        Ok(Some(changed))
    }
}
