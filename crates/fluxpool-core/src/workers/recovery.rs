//! Temp-unschedulable recovery: database scan feeds the lease queue, pollers
//! claim due accounts and re-check their usage windows.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fluxpool_types::{Account, RecoveryConfig};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::lifecycle::run_periodic;
use crate::coordination::{LeaseEntry, LeaseQueue};
use crate::error::{AppError, AppResult};
use crate::health::AccountHealthService;
use crate::modules::repository::AccountRepository;
use crate::quota_window::{
    build_usage_exceeded_reason, build_usage_retry_reason, format_usage_windows,
    is_usage_quota_reason, QuotaWindowMonitor, UsageFetchError, UsageWindowSource,
};
use crate::utils::Clock;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(20);
const POLL_TIMEOUT: Duration = Duration::from_secs(60);
const ACCOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// What happened to one claimed account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Windows are back under threshold; pause cleared and item acked.
    Recovered,
    /// Still paused; back in `pending` at the given time.
    Requeued(DateTime<Utc>),
    /// Resolved elsewhere or no longer a quota pause; item acked.
    Dropped,
}

/// Counters for one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PollSummary {
    pub reclaimed: usize,
    pub claimed: usize,
    pub recovered: usize,
    pub requeued: usize,
    pub dropped: usize,
}

impl PollSummary {
    fn record(&mut self, outcome: RecoveryOutcome) {
        match outcome {
            RecoveryOutcome::Recovered => self.recovered += 1,
            RecoveryOutcome::Requeued(_) => self.requeued += 1,
            RecoveryOutcome::Dropped => self.dropped += 1,
        }
    }
}

pub struct TempUnschedRecoveryWorker {
    repo: Arc<dyn AccountRepository>,
    queue: Arc<dyn LeaseQueue>,
    health: Arc<AccountHealthService>,
    source: Arc<dyn UsageWindowSource>,
    monitor: QuotaWindowMonitor,
    config: RecoveryConfig,
    clock: Arc<dyn Clock>,
}

impl TempUnschedRecoveryWorker {
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        queue: Arc<dyn LeaseQueue>,
        health: Arc<AccountHealthService>,
        source: Arc<dyn UsageWindowSource>,
        monitor: QuotaWindowMonitor,
        config: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { repo, queue, health, source, monitor, config, clock }
    }

    /// Spawn the refresh and poll loops; both stop on `shutdown`.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let refresh_worker = Arc::clone(&self);
        let refresh_shutdown = shutdown.clone();
        let refresh_period = Duration::from_secs(self.config.refresh_interval_secs);
        let poll_period = Duration::from_secs(self.config.poll_interval_secs);

        tokio::spawn(async move {
            let refresh = run_periodic("temp_unsched_refresh", refresh_period, true, refresh_shutdown, || {
                let worker = Arc::clone(&refresh_worker);
                async move {
                    if let Err(e) = worker.refresh().await {
                        tracing::warn!(error = %e, "[TempUnschedRecovery] refresh failed");
                    }
                }
            });
            let poll = run_periodic("temp_unsched_poll", poll_period, true, shutdown, || {
                let worker = Arc::clone(&self);
                async move {
                    if let Err(e) = worker.poll().await {
                        tracing::warn!(error = %e, "[TempUnschedRecovery] poll failed");
                    }
                }
            });
            tokio::join!(refresh, poll);
        })
    }

    fn retry_delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.retry_delay_secs as i64)
    }

    fn lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.config.lease_secs() as i64)
    }

    /// Push quota-caused pauses expiring within the look-ahead into the queue.
    pub async fn refresh(&self) -> AppResult<usize> {
        let work = async {
            let candidates = self
                .repo
                .list_temp_unsched_recovery_candidates(self.config.refresh_window_secs as i64)
                .await?;
            let entries: Vec<LeaseEntry> = candidates
                .iter()
                .map(|c| LeaseEntry { id: c.account_id, due: c.until })
                .collect();
            let added = self.queue.add_candidates(&entries).await?;
            Ok::<_, AppError>((candidates.len(), added))
        };
        let (found, added) = tokio::time::timeout(REFRESH_TIMEOUT, work).await.map_err(|_| {
            AppError::Timeout { operation: "recovery_refresh", secs: REFRESH_TIMEOUT.as_secs() }
        })??;

        if found > 0 {
            tracing::info!(found, added, "[TempUnschedRecovery] candidates queued");
        }
        Ok(added)
    }

    /// Reclaim abandoned leases, then drain due items batch by batch.
    pub async fn poll(&self) -> AppResult<PollSummary> {
        let summary = tokio::time::timeout(POLL_TIMEOUT, self.poll_inner()).await.map_err(|_| {
            AppError::Timeout { operation: "recovery_poll", secs: POLL_TIMEOUT.as_secs() }
        })??;

        if summary.claimed > 0 || summary.reclaimed > 0 {
            tracing::info!(
                reclaimed = summary.reclaimed,
                claimed = summary.claimed,
                recovered = summary.recovered,
                requeued = summary.requeued,
                dropped = summary.dropped,
                "[TempUnschedRecovery] poll finished"
            );
        }
        Ok(summary)
    }

    async fn poll_inner(&self) -> AppResult<PollSummary> {
        let now = self.clock.now();
        let batch = self.config.batch_size.max(1);
        let mut summary = PollSummary {
            reclaimed: self.queue.requeue_expired(now, self.retry_delay(), batch).await?,
            ..PollSummary::default()
        };

        loop {
            let ids = self.queue.claim_due(now, batch, self.lease()).await?;
            if ids.is_empty() {
                break;
            }
            summary.claimed += ids.len();
            for &id in &ids {
                let outcome = self.process(id).await;
                summary.record(outcome);
            }
            if ids.len() < batch {
                break;
            }
        }
        Ok(summary)
    }

    /// Check one claimed account and settle its queue entry.
    ///
    /// Never fails: a queue write that errors leaves the lease to expire and
    /// be reclaimed by a later poll.
    pub async fn process(&self, account_id: i64) -> RecoveryOutcome {
        let outcome = match tokio::time::timeout(ACCOUNT_TIMEOUT, self.check_account(account_id)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(account_id, "[TempUnschedRecovery] check timed out");
                RecoveryOutcome::Requeued(self.clock.now() + self.retry_delay())
            },
        };

        let settled = match outcome {
            RecoveryOutcome::Requeued(until) => self.queue.requeue(account_id, until).await,
            RecoveryOutcome::Recovered | RecoveryOutcome::Dropped => self.queue.ack(account_id).await,
        };
        if let Err(e) = settled {
            tracing::warn!(account_id, error = %e, "[TempUnschedRecovery] failed to settle queue item");
        }
        outcome
    }

    async fn check_account(&self, account_id: i64) -> RecoveryOutcome {
        let now = self.clock.now();
        let account = match self.repo.get_by_id(account_id).await {
            Ok(account) => account,
            Err(e) if e.is_not_found() => {
                tracing::debug!(account_id, "[TempUnschedRecovery] account gone");
                return RecoveryOutcome::Dropped;
            },
            Err(e) => {
                tracing::warn!(account_id, error = %e, "[TempUnschedRecovery] load failed, retrying");
                return RecoveryOutcome::Requeued(now + self.retry_delay());
            },
        };

        let Some(until) = account.temp_unschedulable_until else {
            return RecoveryOutcome::Dropped;
        };
        if !is_usage_quota_reason(&account.temp_unschedulable_reason) {
            tracing::debug!(account_id, "[TempUnschedRecovery] pause no longer quota-caused");
            return RecoveryOutcome::Dropped;
        }
        if until > now {
            return self.track_until(account_id, until, now);
        }

        self.recheck_windows(&account, now).await
    }

    async fn recheck_windows(&self, account: &Account, now: DateTime<Utc>) -> RecoveryOutcome {
        let account_id = account.id;
        let evaluation = match self.monitor.evaluate(account, self.source.as_ref(), now).await {
            Ok(evaluation) if !evaluation.windows.is_empty() => evaluation,
            Ok(_) => return self.extend_for_retry(account, "no usage windows reported", now).await,
            Err(UsageFetchError::Unsupported(platform)) => {
                return self.release_lapsed(account_id, platform, now).await;
            },
            Err(e) => return self.extend_for_retry(account, &e.to_string(), now).await,
        };

        if !evaluation.is_exceeded() {
            if let Err(e) = self.health.clear_temp_unschedulable(account_id).await {
                tracing::warn!(account_id, error = %e, "[TempUnschedRecovery] clear failed, retrying");
                return RecoveryOutcome::Requeued(now + self.retry_delay());
            }
            tracing::info!(
                account_id,
                windows = %format_usage_windows(&evaluation.windows),
                "[TempUnschedRecovery] usage recovered"
            );
            return RecoveryOutcome::Recovered;
        }

        let resume_at = evaluation.resume_at(now, self.retry_delay());
        let reason = build_usage_exceeded_reason(account.platform, &evaluation.exceeded);
        if let Err(e) = self.health.set_temp_unschedulable_with_reason(account_id, resume_at, &reason).await {
            tracing::warn!(account_id, error = %e, "[TempUnschedRecovery] failed to extend pause");
        }
        tracing::info!(
            account_id,
            until = %resume_at,
            windows = %format_usage_windows(&evaluation.exceeded),
            "[TempUnschedRecovery] still exceeded"
        );
        self.track_until(account_id, resume_at, now)
    }

    /// No usage source for this platform: the lapsed pause is cleared rather
    /// than extended, so the account is not rescanned forever.
    async fn release_lapsed(&self, account_id: i64, platform: &str, now: DateTime<Utc>) -> RecoveryOutcome {
        if let Err(e) = self.health.clear_temp_unschedulable(account_id).await {
            tracing::warn!(account_id, error = %e, "[TempUnschedRecovery] clear failed, retrying");
            return RecoveryOutcome::Requeued(now + self.retry_delay());
        }
        tracing::info!(account_id, platform, "[TempUnschedRecovery] no usage source, lapsed pause released");
        RecoveryOutcome::Dropped
    }

    async fn extend_for_retry(&self, account: &Account, detail: &str, now: DateTime<Utc>) -> RecoveryOutcome {
        let until = now + self.retry_delay();
        let reason = build_usage_retry_reason(account.platform, detail);
        if let Err(e) = self.health.set_temp_unschedulable_with_reason(account.id, until, &reason).await {
            tracing::warn!(account_id = account.id, error = %e, "[TempUnschedRecovery] failed to extend pause");
        }
        tracing::warn!(account_id = account.id, detail, "[TempUnschedRecovery] usage unavailable, retrying");
        RecoveryOutcome::Requeued(until)
    }

    /// Requeue at `until`, or hand back to the next database scan when it is
    /// beyond the look-ahead window.
    fn track_until(&self, account_id: i64, until: DateTime<Utc>, now: DateTime<Utc>) -> RecoveryOutcome {
        let horizon = now + chrono::Duration::seconds(self.config.refresh_window_secs as i64);
        if until > horizon {
            tracing::debug!(account_id, until = %until, "[TempUnschedRecovery] beyond look-ahead, left to refresh");
            return RecoveryOutcome::Dropped;
        }
        RecoveryOutcome::Requeued(until)
    }
}
