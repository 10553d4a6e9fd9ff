//! Transition application for upstream failures and operator pauses.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{DateTime, DurationRound, Utc};
use fluxpool_types::{
    Account, SessionWindow, SessionWindowStatus, TempUnschedState, RULE_INDEX_USAGE_WINDOW,
};

use crate::classify::messages::{
    normalize_unschedulable_reason, DEFAULT_TEMP_REASON, MESSAGE_MAX_BYTES,
};
use crate::classify::reset::first_header;
use crate::classify::{
    classify, Classification, ClassifierSettings, HealthTransition, SkipReason,
    SESSION_WINDOW_HOURS,
};
use crate::coordination::TempUnschedCache;
use crate::error::{AppError, AppResult};
use crate::modules::repository::{AccountRepository, RepoResult};
use crate::utils::{sanitize_and_truncate, truncate_with_ellipsis, Clock};

/// Budget for a single repository write.
pub const DEFAULT_REPO_TIMEOUT: Duration = Duration::from_secs(5);

/// Anthropic's per-response session window status.
pub const SESSION_STATUS_HEADER: &str = "anthropic-ratelimit-unified-5h-status";

const LOG_REASON_MAX_BYTES: usize = 256;

/// Applies health transitions to one account store.
pub struct AccountHealthService {
    repo: Arc<dyn AccountRepository>,
    cache: Arc<dyn TempUnschedCache>,
    clock: Arc<dyn Clock>,
    settings: ClassifierSettings,
    repo_timeout: Duration,
}

impl AccountHealthService {
    pub fn new(
        repo: Arc<dyn AccountRepository>,
        cache: Arc<dyn TempUnschedCache>,
        clock: Arc<dyn Clock>,
        settings: ClassifierSettings,
    ) -> Self {
        Self { repo, cache, clock, settings, repo_timeout: DEFAULT_REPO_TIMEOUT }
    }

    #[must_use]
    pub const fn with_repo_timeout(mut self, timeout: Duration) -> Self {
        self.repo_timeout = timeout;
        self
    }

    pub const fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Classify an upstream failure and persist the resulting transition.
    ///
    /// Persistence failures are logged; the returned classification still
    /// tells the caller whether to stop using the account for this request.
    pub async fn handle_upstream_error(
        &self,
        account: &Account,
        status_code: u16,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> Classification {
        let now = self.now();
        let classification = classify(account, status_code, headers, raw_body, &self.settings, now);

        if let Err(e) = self.apply(account, &classification, now).await {
            tracing::error!(
                account_id = account.id,
                status_code,
                decision = classification.transition.decision(),
                error = %e,
                "[Health] failed to persist transition"
            );
        }
        classification
    }

    async fn apply(
        &self,
        account: &Account,
        classification: &Classification,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let id = account.id;
        let status_code = classification.status_code;
        let decision = classification.transition.decision();

        match &classification.transition {
            HealthTransition::Unchanged(SkipReason::ServerError) => {
                tracing::warn!(account_id = id, status_code, decision, "[Health] upstream server error");
            },
            HealthTransition::Unchanged(skip) => {
                tracing::debug!(account_id = id, status_code, decision, ?skip, "[Health] no transition");
            },
            HealthTransition::TempUnschedulable { until, state } => {
                let applied = self
                    .bounded("set_temp_unschedulable", self.repo.set_temp_unschedulable(id, *until, &state.to_reason()))
                    .await?;
                if applied {
                    self.mirror_to_cache(id, state, now).await;
                }
                tracing::warn!(
                    account_id = id,
                    status_code,
                    decision,
                    rule_index = state.rule_index,
                    until = %until,
                    applied,
                    reason = %truncate_with_ellipsis(&state.error_message, LOG_REASON_MAX_BYTES),
                    "[TempUnsched] account paused"
                );
            },
            HealthTransition::RateLimited { reset_at, session_window, reason, .. } => {
                self.bounded("set_rate_limited", self.repo.set_rate_limited(id, *reset_at)).await?;
                if let Some(window) = session_window {
                    self.bounded("update_session_window", self.repo.update_session_window(id, window))
                        .await?;
                }
                tracing::warn!(
                    account_id = id,
                    status_code,
                    decision,
                    reset_at = %reset_at,
                    reason = %truncate_with_ellipsis(reason, LOG_REASON_MAX_BYTES),
                    "[RateLimit] account rate limited"
                );
            },
            HealthTransition::Overloaded { until } => {
                self.bounded("set_overloaded", self.repo.set_overloaded(id, *until)).await?;
                tracing::warn!(account_id = id, status_code, decision, until = %until, "[Overload] account overloaded");
            },
            HealthTransition::Disabled { message } => {
                self.bounded("set_error", self.repo.set_error(id, message)).await?;
                tracing::error!(
                    account_id = id,
                    status_code,
                    decision,
                    reason = %truncate_with_ellipsis(message, LOG_REASON_MAX_BYTES),
                    "[AuthError] account disabled"
                );
            },
        }
        Ok(())
    }

    /// Pause `account_id` until `until` with a system reason.
    ///
    /// A no-op when `until` is not in the future. The stored pause is never
    /// shortened.
    pub async fn set_temp_unschedulable_with_reason(
        &self,
        account_id: i64,
        until: DateTime<Utc>,
        reason: &str,
    ) -> AppResult<()> {
        let now = self.now();
        if until <= now {
            return Ok(());
        }
        let reason = match reason.trim() {
            "" => DEFAULT_TEMP_REASON.to_string(),
            trimmed => sanitize_and_truncate(trimmed, MESSAGE_MAX_BYTES),
        };

        let applied = self
            .bounded("set_temp_unschedulable", self.repo.set_temp_unschedulable(account_id, until, &reason))
            .await?;
        if applied {
            let state = TempUnschedState {
                until_unix: until.timestamp(),
                triggered_at_unix: now.timestamp(),
                status_code: 0,
                rule_index: RULE_INDEX_USAGE_WINDOW,
                matched_keyword: String::new(),
                error_message: reason.clone(),
            };
            self.mirror_to_cache(account_id, &state, now).await;
        }
        tracing::info!(
            account_id,
            until = %until,
            applied,
            reason = %truncate_with_ellipsis(&reason, LOG_REASON_MAX_BYTES),
            "[TempUnsched] system pause"
        );
        Ok(())
    }

    /// Clear the pause in the database, then drop the cache entry.
    pub async fn clear_temp_unschedulable(&self, account_id: i64) -> AppResult<()> {
        self.bounded("clear_temp_unschedulable", self.repo.clear_temp_unschedulable(account_id)).await?;
        if let Err(e) = self.cache.delete(account_id).await {
            tracing::warn!(account_id, error = %e, "[TempUnsched] cache delete failed");
        }
        tracing::info!(account_id, "[TempUnsched] pause cleared");
        Ok(())
    }

    /// Current pause, cache first with database fallback.
    pub async fn get_temp_unsched_status(&self, account_id: i64) -> AppResult<Option<TempUnschedState>> {
        let now = self.now();
        match self.cache.get(account_id).await {
            Ok(Some(state)) if state.is_active_at(now.timestamp()) => return Ok(Some(state)),
            Ok(_) => {},
            Err(e) => tracing::warn!(account_id, error = %e, "[TempUnsched] cache read failed"),
        }

        let account = self.bounded("get_by_id", self.repo.get_by_id(account_id)).await?;
        let Some(until) = account.temp_unschedulable_until.filter(|until| *until > now) else {
            return Ok(None);
        };
        let state = TempUnschedState::from_reason(&account.temp_unschedulable_reason)
            .map(|mut state| {
                state.until_unix = until.timestamp();
                state
            })
            .unwrap_or_else(|| TempUnschedState {
                until_unix: until.timestamp(),
                rule_index: RULE_INDEX_USAGE_WINDOW,
                error_message: account.temp_unschedulable_reason.clone(),
                ..TempUnschedState::default()
            });
        self.mirror_to_cache(account_id, &state, now).await;
        Ok(Some(state))
    }

    /// Track Anthropic's 5h session window from a successful response.
    pub async fn update_session_window(&self, account: &Account, headers: &HeaderMap) -> AppResult<()> {
        let Some(status) = first_header(headers, &[SESSION_STATUS_HEADER])
            .and_then(|raw| SessionWindowStatus::from_string(&raw))
        else {
            return Ok(());
        };
        let now = self.now();

        let window = if SessionWindow::needs_init(account.session_window.as_ref(), now) {
            if status == SessionWindowStatus::Rejected {
                None
            } else {
                let start = now.duration_trunc(chrono::Duration::hours(1)).unwrap_or(now);
                Some(SessionWindow { start, end: start + chrono::Duration::hours(SESSION_WINDOW_HOURS), status })
            }
        } else {
            account
                .session_window
                .filter(|current| current.status != status)
                .map(|current| SessionWindow { status, ..current })
        };

        if let Some(window) = window {
            self.bounded("update_session_window", self.repo.update_session_window(account.id, &window))
                .await?;
            tracing::debug!(
                account_id = account.id,
                status = status.as_str(),
                start = %window.start,
                end = %window.end,
                "[SessionWindow] updated"
            );
        }

        if status == SessionWindowStatus::Allowed && account.is_rate_limited(now) {
            self.bounded("clear_rate_limit", self.repo.clear_rate_limit(account.id)).await?;
            tracing::info!(account_id = account.id, "[RateLimit] cleared by allowed session status");
        }
        Ok(())
    }

    /// Hard unschedule with a normalised operator/system reason.
    pub async fn set_unschedulable_with_reason(&self, account_id: i64, reason: &str) -> AppResult<()> {
        let reason = normalize_unschedulable_reason(reason);
        self.bounded("set_unschedulable_with_reason", self.repo.set_unschedulable_with_reason(account_id, &reason))
            .await?;
        tracing::warn!(
            account_id,
            reason = %truncate_with_ellipsis(&reason, LOG_REASON_MAX_BYTES),
            "[Health] account unscheduled"
        );
        Ok(())
    }

    async fn mirror_to_cache(&self, account_id: i64, state: &TempUnschedState, now: DateTime<Utc>) {
        if let Err(e) = self.cache.set(account_id, state, now).await {
            tracing::warn!(account_id, error = %e, "[TempUnsched] cache write failed");
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = RepoResult<T>>,
    {
        match tokio::time::timeout(self.repo_timeout, fut).await {
            Ok(result) => result.map_err(AppError::from),
            Err(_) => Err(AppError::Timeout { operation, secs: self.repo_timeout.as_secs() }),
        }
    }
}
