use super::*;
use axum::http::{HeaderMap, HeaderValue};
use chrono::{DateTime, Duration, TimeZone, Utc};
use fluxpool_types::{
    Account, CredentialType, CustomRule, HealthError, Platform, SessionWindowStatus,
    RULE_INDEX_AUTH_COOLDOWN,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().unwrap_or_default()
}

fn apikey_account() -> Account {
    Account::new(7, Platform::OpenAi, CredentialType::ApiKey)
}

fn oauth_account() -> Account {
    Account::new(8, Platform::Anthropic, CredentialType::OAuth)
}

fn run(account: &Account, status: u16, headers: &HeaderMap, body: &str) -> Classification {
    classify(account, status, headers, body.as_bytes(), &ClassifierSettings::default(), now())
}

#[test]
fn test_unified_reset_sets_rate_limit_and_session_window() {
    let reset = now() + Duration::seconds(600);
    let mut headers = HeaderMap::new();
    headers.insert(
        "anthropic-ratelimit-unified-reset",
        HeaderValue::from_str(&reset.timestamp().to_string()).unwrap(),
    );

    let result = run(&oauth_account(), 429, &headers, r#"{"error":{"type":"rate_limit_error"}}"#);

    assert!(result.should_pause_now);
    match result.transition {
        HealthTransition::RateLimited { reset_at, kind, session_window, .. } => {
            assert_eq!(reset_at, reset);
            assert_eq!(kind, RateLimitKind::RateLimited);
            let window = session_window.unwrap();
            assert_eq!(window.start, reset - Duration::hours(5));
            assert_eq!(window.end, reset);
            assert_eq!(window.status, SessionWindowStatus::Rejected);
        },
        other => panic!("unexpected transition: {other:?}"),
    }
}

#[test]
fn test_insufficient_quota_without_header_falls_back_to_thirty_minutes() {
    let body = r#"{"error":{"code":"insufficient_quota","message":"You exceeded your current quota"}}"#;
    let result = run(&apikey_account(), 429, &HeaderMap::new(), body);

    match &result.transition {
        HealthTransition::RateLimited { reset_at, kind, session_window, .. } => {
            assert_eq!(*reset_at, now() + Duration::minutes(30));
            assert_eq!(*kind, RateLimitKind::QuotaExceeded);
            assert!(session_window.is_none());
        },
        other => panic!("unexpected transition: {other:?}"),
    }
    assert!(matches!(result.failure(), Some(HealthError::QuotaExceeded { .. })));
}

#[test]
fn test_quota_reset_beyond_calendar_uses_fallback() {
    let body = r#"{"error":{"code":"insufficient_quota","resets_in_seconds":9223372036854775807}}"#;
    let result = run(&apikey_account(), 429, &HeaderMap::new(), body);

    match result.transition {
        HealthTransition::RateLimited { reset_at, kind, .. } => {
            assert_eq!(reset_at, now() + Duration::minutes(30));
            assert_eq!(kind, RateLimitKind::QuotaExceeded);
        },
        other => panic!("unexpected transition: {other:?}"),
    }
}

#[test]
fn test_quota_reset_prefers_header_then_body() {
    let mut headers = HeaderMap::new();
    headers.insert("retry-after", HeaderValue::from_static("120"));
    let body = r#"{"error":{"code":"insufficient_quota","resets_in_seconds":3600}}"#;
    let result = run(&apikey_account(), 429, &headers, body);
    assert!(matches!(
        result.transition,
        HealthTransition::RateLimited { reset_at, .. } if reset_at == now() + Duration::seconds(120)
    ));

    let result = run(&apikey_account(), 429, &HeaderMap::new(), body);
    assert!(matches!(
        result.transition,
        HealthTransition::RateLimited { reset_at, .. } if reset_at == now() + Duration::hours(1)
    ));
}

#[test]
fn test_plain_rate_limit_defaults_to_five_minutes() {
    let result = run(&apikey_account(), 429, &HeaderMap::new(), "slow down");
    assert!(matches!(
        result.transition,
        HealthTransition::RateLimited { reset_at, kind: RateLimitKind::RateLimited, session_window: None, .. }
            if reset_at == now() + Duration::minutes(5)
    ));
}

#[test]
fn test_past_unified_reset_is_ignored() {
    let mut headers = HeaderMap::new();
    let past = now() - Duration::minutes(1);
    headers.insert(
        "anthropic-ratelimit-unified-reset",
        HeaderValue::from_str(&past.timestamp().to_string()).unwrap(),
    );
    let result = run(&oauth_account(), 429, &headers, "");
    assert!(matches!(
        result.transition,
        HealthTransition::RateLimited { reset_at, session_window: None, .. }
            if reset_at == now() + Duration::minutes(5)
    ));
}

#[test]
fn test_429_never_disables_even_with_rules_and_auth_wording() {
    let mut account = apikey_account();
    account.custom_rules = vec![CustomRule {
        error_code: 429,
        keywords: vec!["invalid api key".into()],
        duration_minutes: 60,
        description: String::new(),
    }];
    for body in [
        r#"{"error":{"code":"invalid_api_key"}}"#,
        r#"{"error":{"code":"billing_hard_limit_reached"}}"#,
        "invalid api key",
        "",
    ] {
        let result = run(&account, 429, &HeaderMap::new(), body);
        assert!(!result.transition.is_disable(), "body {body} disabled the account");
        assert!(matches!(result.transition, HealthTransition::RateLimited { .. }));
    }
}

#[test]
fn test_custom_rule_wins_for_403() {
    let mut account = apikey_account();
    account.custom_rules = vec![
        CustomRule {
            error_code: 401,
            keywords: vec!["banned".into()],
            duration_minutes: 10,
            description: String::new(),
        },
        CustomRule {
            error_code: 403,
            keywords: vec!["banned".into()],
            duration_minutes: 60,
            description: "provider ban".into(),
        },
    ];

    let result = run(&account, 403, &HeaderMap::new(), r#"{"error":{"message":"You are BANNED"}}"#);

    assert!(result.should_pause_now);
    match result.transition {
        HealthTransition::TempUnschedulable { until, state } => {
            assert_eq!(until, now() + Duration::minutes(60));
            assert_eq!(state.rule_index, 1);
            assert_eq!(state.status_code, 403);
            assert_eq!(state.matched_keyword, "banned");
            assert!(state.error_message.starts_with("provider ban; matched_keyword=banned"));
        },
        other => panic!("unexpected transition: {other:?}"),
    }
}

#[test]
fn test_custom_rule_with_unbounded_duration_falls_through() {
    let mut account = apikey_account();
    account.custom_rules = vec![CustomRule {
        error_code: 403,
        keywords: vec!["blocked".into()],
        duration_minutes: i64::MAX,
        description: String::new(),
    }];

    let result = run(&account, 403, &HeaderMap::new(), "blocked");

    assert!(matches!(result.transition, HealthTransition::Disabled { .. }));
}

#[test]
fn test_402_and_403_disable_without_rule() {
    let mut headers = HeaderMap::new();
    headers.insert("x-request-id", HeaderValue::from_static("req_123"));
    for status in [402, 403] {
        let result = run(&apikey_account(), status, &headers, r#"{"error":{"message":"nope"}}"#);
        match &result.transition {
            HealthTransition::Disabled { message } => {
                assert!(message.contains(&format!("({status})")));
                assert!(message.contains("upstream_message=nope"));
                assert!(message.contains("request_id=req_123"));
            },
            other => panic!("unexpected transition: {other:?}"),
        }
        assert!(matches!(result.failure(), Some(HealthError::AuthPermanent { .. })));
    }
}

#[test]
fn test_401_oauth_gets_cooldown() {
    let result = run(&oauth_account(), 401, &HeaderMap::new(), r#"{"error":{"code":"invalid_api_key"}}"#);
    match result.transition {
        HealthTransition::TempUnschedulable { until, state } => {
            assert_eq!(until, now() + Duration::minutes(5));
            assert_eq!(state.rule_index, RULE_INDEX_AUTH_COOLDOWN);
            assert_eq!(state.status_code, 401);
        },
        other => panic!("unexpected transition: {other:?}"),
    }
}

#[test]
fn test_401_official_apikey_with_strong_signal_disables() {
    let result = run(
        &apikey_account(),
        401,
        &HeaderMap::new(),
        r#"{"error":{"message":"Incorrect API key provided: sk-abcdefghijklmnopqrstuvwx"}}"#,
    );
    match result.transition {
        HealthTransition::Disabled { message } => {
            assert!(message.starts_with("Authentication failed (401)"));
            assert!(!message.contains("sk-abcdefghijklmnopqrstuvwx"));
        },
        other => panic!("unexpected transition: {other:?}"),
    }
}

#[test]
fn test_401_relay_upstream_is_not_trusted() {
    let mut account = apikey_account();
    account.base_url = "https://relay.example.com/v1".into();
    let result = run(&account, 401, &HeaderMap::new(), r#"{"error":{"code":"invalid_api_key"}}"#);
    assert!(matches!(result.transition, HealthTransition::TempUnschedulable { .. }));
}

#[test]
fn test_529_overloads_without_pausing_request() {
    let result = run(&oauth_account(), 529, &HeaderMap::new(), "");
    assert!(!result.should_pause_now);
    assert_eq!(
        result.transition,
        HealthTransition::Overloaded { until: now() + Duration::minutes(10) }
    );
}

#[test]
fn test_other_5xx_and_unknown_codes_are_log_only() {
    for (status, reason) in [(500, SkipReason::ServerError), (503, SkipReason::ServerError), (400, SkipReason::Unhandled)] {
        let result = run(&oauth_account(), status, &HeaderMap::new(), "boom");
        assert_eq!(result.transition, HealthTransition::Unchanged(reason));
        assert!(result.failure().is_none());
    }
}

#[test]
fn test_allowlist_opt_out() {
    let mut account = apikey_account();
    account.custom_error_codes = Some(vec![429]);
    let result = run(&account, 403, &HeaderMap::new(), "forbidden");
    assert_eq!(result.transition, HealthTransition::Unchanged(SkipReason::NotInAllowlist));
    assert!(!result.should_pause_now);
}

#[test]
fn test_settings_from_config() {
    let config = fluxpool_types::HealthConfig {
        auth_401_cooldown_secs: 60,
        overload_cooldown_minutes: 2,
        ..Default::default()
    };
    let settings = ClassifierSettings::from(&config);
    let result = classify(&oauth_account(), 529, &HeaderMap::new(), b"", &settings, now());
    assert_eq!(result.transition, HealthTransition::Overloaded { until: now() + Duration::minutes(2) });
    let result = classify(&oauth_account(), 401, &HeaderMap::new(), b"", &settings, now());
    assert!(matches!(
        result.transition,
        HealthTransition::TempUnschedulable { until, .. } if until == now() + Duration::seconds(60)
    ));
}
