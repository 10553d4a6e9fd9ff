//! Pure mapping from an upstream failure response to a health transition.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use fluxpool_types::{
    Account, HealthConfig, HealthError, SessionWindow, SessionWindowStatus, TempUnschedState,
    RULE_INDEX_AUTH_COOLDOWN,
};

use super::auth_signal::should_hard_disable_401;
use super::error_body::ErrorBody;
use super::messages::{
    build_auth_cooldown_message, build_auth_error_message, build_custom_rule_message,
    build_quota_exceeded_reason, build_rate_limit_reason, AUTH_401_MESSAGE, FORBIDDEN_403_MESSAGE,
    PAYMENT_402_MESSAGE,
};
use super::quota_signal::detect_quota_exceeded;
use super::reset::{parse_reset_from_headers, parse_unified_reset};
use crate::custom_rules::{match_rule, prepare_body};

/// Length of Anthropic's unified session window.
pub const SESSION_WINDOW_HOURS: i64 = 5;

/// Cooldowns the classifier applies when upstream gives no better signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierSettings {
    pub auth_401_cooldown: Duration,
    pub overload_cooldown: Duration,
    pub quota_fallback: Duration,
    pub rate_limit_fallback: Duration,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for ClassifierSettings {
    fn from(config: &HealthConfig) -> Self {
        Self {
            auth_401_cooldown: Duration::seconds(config.auth_401_cooldown_secs as i64),
            overload_cooldown: Duration::minutes(config.overload_cooldown_minutes as i64),
            quota_fallback: Duration::minutes(config.quota_fallback_minutes as i64),
            rate_limit_fallback: Duration::minutes(config.rate_limit_fallback_minutes as i64),
        }
    }
}

/// Which 429 flavour was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitKind {
    QuotaExceeded,
    RateLimited,
}

/// Why a response produced no state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// apikey allowlist excludes this status
    NotInAllowlist,
    /// 5xx other than 529: logged only
    ServerError,
    /// Status code has no default handling
    Unhandled,
}

/// State change to apply to the account.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthTransition {
    Unchanged(SkipReason),
    TempUnschedulable {
        until: DateTime<Utc>,
        state: TempUnschedState,
    },
    RateLimited {
        reset_at: DateTime<Utc>,
        kind: RateLimitKind,
        /// Back-derived `[reset-5h, reset]` when the unified reset header was present
        session_window: Option<SessionWindow>,
        /// Log-only reason
        reason: String,
    },
    Overloaded {
        until: DateTime<Utc>,
    },
    Disabled {
        message: String,
    },
}

impl HealthTransition {
    pub const fn is_disable(&self) -> bool {
        matches!(self, Self::Disabled { .. })
    }

    /// Short label for structured logs.
    pub const fn decision(&self) -> &'static str {
        match self {
            Self::Unchanged(_) => "none",
            Self::TempUnschedulable { .. } => "temp_unschedulable",
            Self::RateLimited { kind: RateLimitKind::QuotaExceeded, .. } => "quota_exceeded",
            Self::RateLimited { .. } => "rate_limited",
            Self::Overloaded { .. } => "overloaded",
            Self::Disabled { .. } => "disabled",
        }
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status_code: u16,
    pub transition: HealthTransition,
    /// Caller should stop dispatching to this account for the current request
    pub should_pause_now: bool,
}

impl Classification {
    fn new(status_code: u16, transition: HealthTransition, should_pause_now: bool) -> Self {
        Self { status_code, transition, should_pause_now }
    }

    /// Error taxonomy entry for this outcome, if any.
    pub fn failure(&self) -> Option<HealthError> {
        let status_code = self.status_code;
        match &self.transition {
            HealthTransition::Unchanged(_) => None,
            HealthTransition::TempUnschedulable { until, .. }
            | HealthTransition::Overloaded { until }
            | HealthTransition::RateLimited {
                reset_at: until,
                kind: RateLimitKind::RateLimited,
                ..
            } => Some(HealthError::TransientUpstream { status_code, until: *until }),
            HealthTransition::RateLimited { reset_at, kind: RateLimitKind::QuotaExceeded, .. } => {
                Some(HealthError::QuotaExceeded { reset_at: *reset_at })
            },
            HealthTransition::Disabled { message } => {
                Some(HealthError::AuthPermanent { status_code, message: message.clone() })
            },
        }
    }
}

/// Map an upstream failure to a health transition. Never panics, never does I/O.
pub fn classify(
    account: &Account,
    status_code: u16,
    headers: &HeaderMap,
    raw_body: &[u8],
    settings: &ClassifierSettings,
    now: DateTime<Utc>,
) -> Classification {
    if !account.should_handle_error_code(status_code) {
        return Classification::new(
            status_code,
            HealthTransition::Unchanged(SkipReason::NotInAllowlist),
            false,
        );
    }

    if status_code != 429 {
        if let Some(transition) = custom_rule_transition(account, status_code, raw_body, now) {
            return Classification::new(status_code, transition, true);
        }
    }

    let body = ErrorBody::parse(raw_body);
    match status_code {
        401 => {
            let transition = if should_hard_disable_401(account, headers, raw_body) {
                HealthTransition::Disabled {
                    message: build_auth_error_message(AUTH_401_MESSAGE, headers, &body),
                }
            } else {
                auth_cooldown_transition(headers, &body, settings, now)
            };
            Classification::new(status_code, transition, true)
        },
        402 => Classification::new(
            status_code,
            HealthTransition::Disabled {
                message: build_auth_error_message(PAYMENT_402_MESSAGE, headers, &body),
            },
            true,
        ),
        403 => Classification::new(
            status_code,
            HealthTransition::Disabled {
                message: build_auth_error_message(FORBIDDEN_403_MESSAGE, headers, &body),
            },
            true,
        ),
        429 => Classification::new(status_code, classify_429(headers, &body, settings, now), true),
        529 => Classification::new(
            status_code,
            HealthTransition::Overloaded { until: now + settings.overload_cooldown },
            false,
        ),
        500..=599 => {
            Classification::new(status_code, HealthTransition::Unchanged(SkipReason::ServerError), false)
        },
        _ => Classification::new(status_code, HealthTransition::Unchanged(SkipReason::Unhandled), false),
    }
}

fn custom_rule_transition(
    account: &Account,
    status_code: u16,
    raw_body: &[u8],
    now: DateTime<Utc>,
) -> Option<HealthTransition> {
    if account.custom_rules.is_empty() || raw_body.is_empty() {
        return None;
    }
    let body_lower = prepare_body(raw_body);
    let hit = match_rule(&account.custom_rules, status_code, &body_lower, now)?;
    let until = hit.until;
    let state = TempUnschedState {
        until_unix: until.timestamp(),
        triggered_at_unix: now.timestamp(),
        status_code,
        rule_index: i32::try_from(hit.index).unwrap_or(i32::MAX),
        error_message: build_custom_rule_message(
            &hit.rule.description,
            &hit.matched_keyword,
            raw_body,
        ),
        matched_keyword: hit.matched_keyword,
    };
    Some(HealthTransition::TempUnschedulable { until, state })
}

fn auth_cooldown_transition(
    headers: &HeaderMap,
    body: &ErrorBody,
    settings: &ClassifierSettings,
    now: DateTime<Utc>,
) -> HealthTransition {
    let until = now + settings.auth_401_cooldown;
    let state = TempUnschedState {
        until_unix: until.timestamp(),
        triggered_at_unix: now.timestamp(),
        status_code: 401,
        rule_index: RULE_INDEX_AUTH_COOLDOWN,
        matched_keyword: String::new(),
        error_message: build_auth_cooldown_message(headers, body),
    };
    HealthTransition::TempUnschedulable { until, state }
}

fn classify_429(
    headers: &HeaderMap,
    body: &ErrorBody,
    settings: &ClassifierSettings,
    now: DateTime<Utc>,
) -> HealthTransition {
    if let Some(signal) = detect_quota_exceeded(body) {
        let reset_at = parse_reset_from_headers(headers, now)
            .or_else(|| body.reset_at(now))
            .filter(|reset| *reset > now)
            .unwrap_or_else(|| now + settings.quota_fallback);
        return HealthTransition::RateLimited {
            reset_at,
            kind: RateLimitKind::QuotaExceeded,
            session_window: None,
            reason: build_quota_exceeded_reason(signal.code.as_deref(), headers, body, reset_at),
        };
    }

    let unified = parse_unified_reset(headers, now).filter(|reset| *reset > now);
    let reset_at = unified
        .or_else(|| parse_reset_from_headers(headers, now).filter(|reset| *reset > now))
        .unwrap_or_else(|| now + settings.rate_limit_fallback);
    let session_window = unified.map(|end| SessionWindow {
        start: end - Duration::hours(SESSION_WINDOW_HOURS),
        end,
        status: SessionWindowStatus::Rejected,
    });
    HealthTransition::RateLimited {
        reset_at,
        kind: RateLimitKind::RateLimited,
        session_window,
        reason: build_rate_limit_reason(headers, body, reset_at),
    }
}
