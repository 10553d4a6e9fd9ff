//! Daily usage refresh: once a day at a configurable local `HH:MM`, read every
//! schedulable account's usage windows and pause or resume it accordingly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use fluxpool_types::models::config::parse_daily_time;
use fluxpool_types::{Account, Platform, UsageRefreshResult, UsageWindowConfig};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::coordination::{run_exclusive, AdvisoryJob, JobLocker};
use crate::error::AppResult;
use crate::health::AccountHealthService;
use crate::modules::repository::AccountRepository;
use crate::quota_window::{
    build_usage_exceeded_reason, codex_usage_windows, evaluate_windows, format_usage_windows,
    is_usage_quota_reason, CodexProber, CodexUsageSnapshot, GenericUsageSource, QuotaWindowMonitor,
    UsageFetchError, UsageFetcher, UsageWindow,
};
use crate::utils::Clock;

const SCHEDULE_CHECK_INTERVAL: Duration = Duration::from_secs(30);
const REFRESH_BUDGET: Duration = Duration::from_secs(30 * 60);

/// Next occurrence of `hour:minute` in `now`'s time zone, strictly after `now`.
pub fn next_run_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let tz = now.timezone();
    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest() {
            if candidate > *now {
                return Some(candidate.with_timezone(&Utc));
            }
        }
        date = date.succ_opt()?;
    }
    None
}

fn refresh_result(account_id: i64, action: &str, outcome: &str, detail: impl Into<String>) -> UsageRefreshResult {
    UsageRefreshResult {
        account_id,
        action: action.to_string(),
        outcome: outcome.to_string(),
        detail: detail.into(),
    }
}

/// Where an account's windows came from, or why they could not be read.
enum UsageRead {
    Windows(Vec<UsageWindow>),
    Done(UsageRefreshResult),
}

pub struct DailyUsageRefreshWorker {
    repo: Arc<dyn AccountRepository>,
    health: Arc<AccountHealthService>,
    locker: Arc<dyn JobLocker>,
    clock: Arc<dyn Clock>,
    fetcher: Option<Arc<dyn UsageFetcher>>,
    prober: Option<Arc<dyn CodexProber>>,
    config: RwLock<UsageWindowConfig>,
    reset_tx: mpsc::Sender<()>,
    reset_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl DailyUsageRefreshWorker {
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        health: Arc<AccountHealthService>,
        locker: Arc<dyn JobLocker>,
        clock: Arc<dyn Clock>,
        config: UsageWindowConfig,
    ) -> Self {
        let (reset_tx, reset_rx) = mpsc::channel(1);
        Self {
            repo,
            health,
            locker,
            clock,
            fetcher: None,
            prober: None,
            config: RwLock::new(config),
            reset_tx,
            reset_rx: Mutex::new(Some(reset_rx)),
        }
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn UsageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_prober(mut self, prober: Arc<dyn CodexProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    /// False when every account would come back `unsupported`.
    pub fn has_usage_source(&self) -> bool {
        self.fetcher.is_some() || self.prober.is_some()
    }

    pub fn schedule(&self) -> String {
        self.config.read().daily_refresh_time.clone()
    }

    /// Change the daily time. Returns `false` for a malformed `HH:MM`.
    pub fn set_schedule(&self, value: &str) -> bool {
        if parse_daily_time(value).is_none() {
            return false;
        }
        self.config.write().daily_refresh_time = value.trim().to_string();
        true
    }

    /// Restart the current wait without stopping the loop.
    pub fn reset_schedule(&self) {
        if self.reset_tx.try_send(()).is_err() {
            tracing::debug!("[DailyUsageRefresh] reset already pending");
        }
    }

    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let reset_rx = self.reset_rx.lock().take();
        tokio::spawn(async move {
            let Some(mut reset_rx) = reset_rx else {
                tracing::warn!("[DailyUsageRefresh] already started");
                return;
            };
            let mut ticker = tokio::time::interval(SCHEDULE_CHECK_INTERVAL);
            ticker.tick().await;
            tracing::info!(schedule = %self.schedule(), "[DailyUsageRefresh] started");

            'schedule: loop {
                let schedule = self.schedule();
                let now = self.clock.now();
                let next = parse_daily_time(&schedule)
                    .and_then(|(hour, minute)| next_run_after(&now.with_timezone(&Local), hour, minute));
                let wait = match next {
                    Some(next) => {
                        tracing::debug!(next = %next, "[DailyUsageRefresh] next run scheduled");
                        (next - now).to_std().unwrap_or(Duration::ZERO)
                    },
                    None => {
                        tracing::warn!(schedule = %schedule, "[DailyUsageRefresh] invalid schedule");
                        Duration::MAX
                    },
                };
                let sleep = tokio::time::sleep(wait.min(Duration::from_secs(2 * 86_400)));
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        () = &mut sleep => {
                            if next.is_some() {
                                self.run_scheduled().await;
                            }
                            continue 'schedule;
                        }
                        _ = ticker.tick() => {
                            if self.schedule() != schedule {
                                tracing::info!(schedule = %self.schedule(), "[DailyUsageRefresh] schedule changed");
                                continue 'schedule;
                            }
                        }
                        msg = reset_rx.recv() => {
                            if msg.is_none() {
                                break 'schedule;
                            }
                            tracing::info!("[DailyUsageRefresh] schedule reset");
                            continue 'schedule;
                        }
                        _ = shutdown.changed() => break 'schedule,
                    }
                }
            }
            tracing::info!("[DailyUsageRefresh] shutting down");
        })
    }

    async fn run_scheduled(&self) {
        match self.run_once().await {
            Ok(Some(results)) => {
                let paused = results.iter().filter(|r| r.outcome == "paused").count();
                let cleared = results.iter().filter(|r| r.outcome == "cleared").count();
                tracing::info!(accounts = results.len(), paused, cleared, "[DailyUsageRefresh] run finished");
            },
            Ok(None) => {},
            Err(e) => tracing::warn!(error = %e, "[DailyUsageRefresh] run failed"),
        }
    }

    /// One run under the advisory lock. `Ok(None)` when another instance has it.
    pub async fn run_once(&self) -> AppResult<Option<Vec<UsageRefreshResult>>> {
        let outcome =
            run_exclusive(self.locker.as_ref(), AdvisoryJob::DailyUsageRefresh, REFRESH_BUDGET, || {
                self.refresh_all()
            })
            .await?;
        outcome.transpose()
    }

    /// Refresh every schedulable account with bounded concurrency.
    pub async fn refresh_all(&self) -> AppResult<Vec<UsageRefreshResult>> {
        let accounts = self.repo.list_schedulable().await?;
        let (concurrency, per_account) = {
            let config = self.config.read();
            (config.refresh_concurrency.max(1), Duration::from_secs(config.per_account_timeout_secs))
        };

        let mut results: Vec<UsageRefreshResult> = stream::iter(accounts)
            .map(|account| async move {
                let id = account.id;
                match tokio::time::timeout(per_account, self.refresh_account(&account)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(account_id = id, "[DailyUsageRefresh] account timed out");
                        refresh_result(id, "fetch", "timeout", format!("exceeded {}s", per_account.as_secs()))
                    },
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|r| r.account_id);
        Ok(results)
    }

    /// Read, evaluate and act on one account's usage.
    pub async fn refresh_account(&self, account: &Account) -> UsageRefreshResult {
        let id = account.id;
        let now = self.clock.now();
        let windows = match self.read_usage(account, now).await {
            UsageRead::Windows(windows) => windows,
            UsageRead::Done(outcome) => return outcome,
        };
        if windows.is_empty() {
            return refresh_result(id, "none", "no_data", "no usage windows reported");
        }

        let (threshold, cooldown) = {
            let config = self.config.read();
            (config.disable_percent, chrono::Duration::seconds(config.cooldown_secs as i64))
        };
        let evaluation = evaluate_windows(windows, QuotaWindowMonitor::new(threshold).threshold(), now);

        if evaluation.is_exceeded() {
            let until = evaluation.resume_at(now, cooldown);
            let reason = build_usage_exceeded_reason(account.platform, &evaluation.exceeded);
            return match self.health.set_temp_unschedulable_with_reason(id, until, &reason).await {
                Ok(()) => {
                    tracing::info!(
                        account_id = id,
                        until = %until,
                        windows = %format_usage_windows(&evaluation.exceeded),
                        "[DailyUsageRefresh] usage exceeded, account paused"
                    );
                    refresh_result(id, "pause", "paused", reason)
                },
                Err(e) => refresh_result(id, "pause", "error", e.to_string()),
            };
        }

        if account.is_temp_unschedulable(now) && is_usage_quota_reason(&account.temp_unschedulable_reason) {
            return match self.health.clear_temp_unschedulable(id).await {
                Ok(()) => refresh_result(id, "resume", "cleared", format_usage_windows(&evaluation.windows)),
                Err(e) => refresh_result(id, "resume", "error", e.to_string()),
            };
        }
        refresh_result(id, "none", "ok", format_usage_windows(&evaluation.windows))
    }

    async fn read_usage(&self, account: &Account, now: DateTime<Utc>) -> UsageRead {
        let id = account.id;
        if account.platform == Platform::OpenAi {
            let Some(prober) = &self.prober else {
                return UsageRead::Done(refresh_result(id, "skip", "unsupported", "no codex prober configured"));
            };
            let headers = match prober.probe(account).await {
                Ok(headers) => headers,
                Err(e) => return UsageRead::Done(self.fetch_failed(account, e).await),
            };
            let Some(snapshot) = CodexUsageSnapshot::from_headers(&headers, now) else {
                return UsageRead::Done(refresh_result(id, "none", "no_data", "probe returned no usage headers"));
            };
            let updates = snapshot.to_extra_updates(now);
            if let Err(e) = self.repo.update_extra(id, &updates).await {
                tracing::warn!(account_id = id, error = %e, "[DailyUsageRefresh] failed to store codex snapshot");
            }
            let mut extra = account.extra.clone();
            extra.extend(updates);
            return UsageRead::Windows(codex_usage_windows(&extra, now));
        }

        let Some(fetcher) = &self.fetcher else {
            return UsageRead::Done(refresh_result(id, "skip", "unsupported", "no usage fetcher configured"));
        };
        match fetcher.fetch_usage(account).await {
            Ok(info) => UsageRead::Windows(GenericUsageSource::windows_from_info(&info)),
            Err(e) => UsageRead::Done(self.fetch_failed(account, e).await),
        }
    }

    /// Upstream HTTP failures go through the classifier like live traffic.
    async fn fetch_failed(&self, account: &Account, error: UsageFetchError) -> UsageRefreshResult {
        match error {
            UsageFetchError::Upstream { status_code, headers, body } => {
                let classification =
                    self.health.handle_upstream_error(account, status_code, &headers, &body).await;
                refresh_result(
                    account.id,
                    "classify",
                    classification.transition.decision(),
                    format!("usage endpoint returned {status_code}"),
                )
            },
            other => {
                tracing::warn!(account_id = account.id, error = %other, "[DailyUsageRefresh] usage fetch failed");
                refresh_result(account.id, "fetch", "error", other.to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifierSettings;
    use crate::coordination::{LocalJobLocker, MemoryTempUnschedCache};
    use crate::modules::InMemoryAccountRepository;
    use crate::utils::FixedClock;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, HeaderValue};
    use chrono::{Duration as ChronoDuration, FixedOffset};
    use fluxpool_types::{AccountStatus, CredentialType, UsageInfo, UsageProgress};

    const NOW: i64 = 1_772_366_400;

    struct StaticFetcher(Result<UsageInfo, (u16, &'static str)>);

    #[async_trait]
    impl UsageFetcher for StaticFetcher {
        async fn fetch_usage(&self, _account: &Account) -> Result<UsageInfo, UsageFetchError> {
            match &self.0 {
                Ok(info) => Ok(info.clone()),
                Err((status_code, body)) => Err(UsageFetchError::Upstream {
                    status_code: *status_code,
                    headers: HeaderMap::new(),
                    body: body.as_bytes().to_vec(),
                }),
            }
        }
    }

    struct StaticProber(HeaderMap);

    #[async_trait]
    impl CodexProber for StaticProber {
        async fn probe(&self, _account: &Account) -> Result<HeaderMap, UsageFetchError> {
            Ok(self.0.clone())
        }
    }

    struct Harness {
        clock: Arc<FixedClock>,
        repo: Arc<InMemoryAccountRepository>,
        health: Arc<AccountHealthService>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::at_unix(NOW));
        let repo = Arc::new(InMemoryAccountRepository::new(clock.clone()));
        let health = Arc::new(AccountHealthService::new(
            repo.clone(),
            Arc::new(MemoryTempUnschedCache::new()),
            clock.clone(),
            ClassifierSettings::default(),
        ));
        Harness { clock, repo, health }
    }

    fn worker(h: &Harness, disable_percent: u32) -> DailyUsageRefreshWorker {
        let config = UsageWindowConfig { disable_percent, ..UsageWindowConfig::default() };
        DailyUsageRefreshWorker::new(
            h.repo.clone(),
            h.health.clone(),
            Arc::new(LocalJobLocker::new()),
            h.clock.clone(),
            config,
        )
    }

    fn five_hour(utilization: f64, resets_at: Option<DateTime<Utc>>) -> UsageInfo {
        UsageInfo { five_hour: Some(UsageProgress { utilization, resets_at }), ..UsageInfo::default() }
    }

    #[test]
    fn test_next_run_after() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2026, 3, 1, 2, 30, 0).unwrap();
        let next = next_run_after(&now, 3, 0).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap());

        let now = tz.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap();
        let next = next_run_after(&now, 3, 0).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap());
        assert!(next_run_after(&now, 24, 0).is_none());
    }

    #[tokio::test]
    async fn test_exceeded_window_pauses_until_reset() {
        let h = harness();
        let now = h.clock.now();
        let account = Account::new(1, Platform::Anthropic, CredentialType::OAuth);
        h.repo.insert(account.clone());
        let reset = now + ChronoDuration::hours(4);
        let w = worker(&h, 80).with_fetcher(Arc::new(StaticFetcher(Ok(five_hour(99.0, Some(reset))))));

        let res = w.refresh_account(&account).await;

        assert_eq!(res.outcome, "paused");
        let stored = h.repo.account(1).unwrap();
        assert_eq!(stored.temp_unschedulable_until, Some(reset));
        assert!(stored.schedulable);
        assert!(is_usage_quota_reason(&stored.temp_unschedulable_reason));
    }

    #[tokio::test]
    async fn test_healthy_windows_clear_quota_pause() {
        let h = harness();
        let now = h.clock.now();
        let mut account = Account::new(2, Platform::Anthropic, CredentialType::OAuth);
        account.temp_unschedulable_until = Some(now + ChronoDuration::hours(1));
        account.temp_unschedulable_reason = "Anthropic usage window exceeded: 5h used 100.0%".into();
        h.repo.insert(account.clone());
        let w = worker(&h, 100).with_fetcher(Arc::new(StaticFetcher(Ok(five_hour(20.0, None)))));

        let res = w.refresh_account(&account).await;

        assert_eq!(res.outcome, "cleared");
        assert!(h.repo.account(2).unwrap().temp_unschedulable_until.is_none());
    }

    #[tokio::test]
    async fn test_unrelated_pause_is_left_alone() {
        let h = harness();
        let now = h.clock.now();
        let mut account = Account::new(3, Platform::Anthropic, CredentialType::OAuth);
        account.temp_unschedulable_until = Some(now + ChronoDuration::hours(1));
        account.temp_unschedulable_reason = "manual maintenance".into();
        h.repo.insert(account.clone());
        let w = worker(&h, 100).with_fetcher(Arc::new(StaticFetcher(Ok(five_hour(20.0, None)))));

        let res = w.refresh_account(&account).await;

        assert_eq!(res.outcome, "ok");
        assert!(h.repo.account(3).unwrap().temp_unschedulable_until.is_some());
    }

    #[tokio::test]
    async fn test_upstream_failure_is_classified() {
        let h = harness();
        let account = Account::new(4, Platform::Anthropic, CredentialType::OAuth);
        h.repo.insert(account.clone());
        let w = worker(&h, 100).with_fetcher(Arc::new(StaticFetcher(Err((403, "forbidden")))));

        let res = w.refresh_account(&account).await;

        assert_eq!(res.action, "classify");
        assert_eq!(res.outcome, "disabled");
        assert_eq!(h.repo.account(4).unwrap().status, AccountStatus::Error);
    }

    #[tokio::test]
    async fn test_codex_probe_stores_snapshot_and_pauses() {
        let h = harness();
        let now = h.clock.now();
        let account = Account::new(5, Platform::OpenAi, CredentialType::OAuth);
        h.repo.insert(account.clone());
        let mut headers = HeaderMap::new();
        headers.insert("x-codex-primary-used-percent", HeaderValue::from_static("100"));
        headers.insert("x-codex-primary-window-minutes", HeaderValue::from_static("300"));
        headers.insert("x-codex-primary-reset-after-seconds", HeaderValue::from_static("1800"));
        headers.insert("x-codex-secondary-used-percent", HeaderValue::from_static("40"));
        headers.insert("x-codex-secondary-window-minutes", HeaderValue::from_static("10080"));
        headers.insert("x-codex-secondary-reset-after-seconds", HeaderValue::from_static("86400"));
        let w = worker(&h, 100).with_prober(Arc::new(StaticProber(headers)));

        let res = w.refresh_account(&account).await;

        assert_eq!(res.outcome, "paused");
        let stored = h.repo.account(5).unwrap();
        assert_eq!(stored.temp_unschedulable_until, Some(now + ChronoDuration::seconds(1800)));
        assert!(stored.extra.contains_key("codex_5h_used_percent"));
    }

    #[tokio::test]
    async fn test_missing_collaborator_is_skipped() {
        let h = harness();
        let account = Account::new(6, Platform::OpenAi, CredentialType::ApiKey);
        h.repo.insert(account.clone());

        let res = worker(&h, 100).refresh_account(&account).await;

        assert_eq!(res.outcome, "unsupported");
        assert!(h.repo.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_once_reports_every_schedulable_account() {
        let h = harness();
        for id in 1..=7 {
            h.repo.insert(Account::new(id, Platform::Anthropic, CredentialType::OAuth));
        }
        let mut off = Account::new(8, Platform::Anthropic, CredentialType::OAuth);
        off.schedulable = false;
        h.repo.insert(off);
        let w = worker(&h, 100).with_fetcher(Arc::new(StaticFetcher(Ok(five_hour(10.0, None)))));

        let results = w.run_once().await.unwrap().unwrap();

        let ids: Vec<i64> = results.iter().map(|r| r.account_id).collect();
        assert_eq!(ids, (1..=7).collect::<Vec<_>>());
        assert!(results.iter().all(|r| r.outcome == "ok"));
    }

    #[test]
    fn test_set_schedule_rejects_malformed_time() {
        let h = harness();
        let w = worker(&h, 100);
        assert!(!w.set_schedule("25:00"));
        assert!(w.set_schedule("04:30"));
        assert_eq!(w.schedule(), "04:30");
        w.reset_schedule();
        w.reset_schedule();
    }

    #[test]
    fn test_usage_source_presence() {
        let h = harness();
        assert!(!worker(&h, 100).has_usage_source());
        let w = worker(&h, 100).with_fetcher(Arc::new(StaticFetcher(Ok(five_hour(10.0, None)))));
        assert!(w.has_usage_source());
    }
}
