#![allow(unused_crate_dependencies)]
#![allow(clippy::tests_outside_test_module, reason = "integration tests live in tests/ dir")]
#![allow(clippy::expect_used, reason = "integration test: panics are the assertion mechanism")]

//! Runs against a real PostgreSQL. Set `FLUXPOOL_TEST_DATABASE_URL` and run
//! with `--ignored`.

use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fluxpool_core::coordination::{
    run_exclusive, AdvisoryJob, CoordinationError, JobLocker, LockHandle, PgAdvisoryLocker,
};
use fluxpool_core::modules::{AccountRepository, PostgresAccountRepository};

async fn repository() -> PostgresAccountRepository {
    let url = std::env::var("FLUXPOOL_TEST_DATABASE_URL").expect("FLUXPOOL_TEST_DATABASE_URL not set");
    let repo = PostgresAccountRepository::connect(&url).await.expect("connect");
    repo.run_migrations().await.expect("migrations");
    repo
}

async fn insert_account(repo: &PostgresAccountRepository) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO accounts (name, platform, credential_type) VALUES ('it', 'anthropic', 'oauth') RETURNING id",
    )
    .fetch_one(repo.pool())
    .await
    .expect("insert account")
}

fn whole_second(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).expect("valid timestamp")
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_temp_unschedulable_never_shortens() {
    let repo = repository().await;
    let id = insert_account(&repo).await;
    let now = whole_second(Utc::now());
    let long = now + ChronoDuration::hours(2);

    assert!(repo.set_temp_unschedulable(id, long, "long").await.expect("first write"));
    let applied = repo
        .set_temp_unschedulable(id, now + ChronoDuration::minutes(30), "short")
        .await
        .expect("second write");

    assert!(!applied);
    let account = repo.get_by_id(id).await.expect("reload");
    assert_eq!(account.temp_unschedulable_until, Some(long));
    assert_eq!(account.temp_unschedulable_reason, "long");
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_rate_limit_never_shortens() {
    let repo = repository().await;
    let id = insert_account(&repo).await;
    let now = whole_second(Utc::now());
    let long = now + ChronoDuration::minutes(50);

    repo.set_rate_limited(id, long).await.expect("first write");
    repo.set_rate_limited(id, now + ChronoDuration::minutes(5)).await.expect("second write");

    let account = repo.get_by_id(id).await.expect("reload");
    assert_eq!(account.rate_limit_reset_at, Some(long));
    assert!(account.schedulable);
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_recovery_candidates_match_usage_reasons() {
    let repo = repository().await;
    let quota = insert_account(&repo).await;
    let manual = insert_account(&repo).await;
    let soon = Utc::now() + ChronoDuration::minutes(10);
    repo.set_temp_unschedulable(quota, soon, "Anthropic usage window exceeded: 5h used 100.0%")
        .await
        .expect("quota pause");
    repo.set_temp_unschedulable(manual, soon, "manual maintenance").await.expect("manual pause");

    let candidates = repo.list_temp_unsched_recovery_candidates(3600).await.expect("scan");

    assert!(candidates.iter().any(|c| c.account_id == quota));
    assert!(!candidates.iter().any(|c| c.account_id == manual));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_advisory_lock_is_exclusive_across_sessions() {
    let repo = repository().await;
    let first = PgAdvisoryLocker::new(repo.pool().clone());
    let second = PgAdvisoryLocker::new(repo.pool().clone());

    let held = first.try_lock(AdvisoryJob::SubscriptionExpiration).await.expect("lock").expect("acquired");
    assert!(second.try_lock(AdvisoryJob::SubscriptionExpiration).await.expect("lock").is_none());
    held.release().await;

    let ran = run_exclusive(&second, AdvisoryJob::SubscriptionExpiration, Duration::from_secs(5), || async {
        true
    })
    .await
    .expect("run");
    assert_eq!(ran, Some(true));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_exhausted_pool_times_out_without_holding_lock() {
    let url = std::env::var("FLUXPOOL_TEST_DATABASE_URL").expect("FLUXPOOL_TEST_DATABASE_URL not set");
    let pool = sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(&url).await.expect("connect");
    let locker = PgAdvisoryLocker::new(pool.clone()).with_acquire_timeout(Duration::from_millis(200));

    let busy = pool.acquire().await.expect("hold only connection");
    let err = locker.try_lock(AdvisoryJob::AccountExpiration).await.err().expect("timeout");
    assert!(matches!(err, CoordinationError::Timeout { .. }));
    drop(busy);

    let other = repository().await;
    let elsewhere = PgAdvisoryLocker::new(other.pool().clone());
    let held = elsewhere.try_lock(AdvisoryJob::AccountExpiration).await.expect("lock").expect("acquired");
    held.release().await;
}
