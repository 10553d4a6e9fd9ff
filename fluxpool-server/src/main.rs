//! Fluxpool Server - Headless Daemon
//!
//! Runs the account health workers against a shared PostgreSQL and Redis:
//! - temp-unschedulable recovery over the Redis lease queue
//! - account and subscription expiration sweeps
//! - legacy rate-limit reactivation
//! - the daily usage refresh
//!
//! `/healthz` answers liveness, `/readyz` pings both stores.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use redis::aio::ConnectionManager;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fluxpool_core::coordination::{
    JobLocker, LeaseKeys, PgAdvisoryLocker, RedisLeaseQueue, RedisTempUnschedCache,
};
use fluxpool_core::modules::{AccountRepository, PostgresAccountRepository};
use fluxpool_core::quota_window::PlatformUsageSource;
use fluxpool_core::utils::{Clock, SystemClock};
use fluxpool_core::workers::{
    DailyUsageRefreshWorker, ExpirationWorker, RateLimitReactivateWorker,
    TempUnschedRecoveryWorker, WorkerSet,
};
use fluxpool_core::{AccountHealthService, ClassifierSettings, QuotaWindowMonitor};
use fluxpool_types::AppConfig;

mod cli;
mod config;
mod router;
mod server_utils;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut app_config = config::load_config(cli.config.as_deref()).context("Failed to load config")?;
    config::apply_overrides(&mut app_config, &cli);
    config::validate_config(&app_config).context("Invalid configuration")?;

    info!("[Server] fluxpool v{} starting", env!("CARGO_PKG_VERSION"));

    let repo = Arc::new(
        PostgresAccountRepository::connect(&app_config.database_url)
            .await
            .context("Failed to connect to PostgreSQL")?,
    );
    repo.run_migrations().await.context("Failed to run migrations")?;

    let redis_client =
        redis::Client::open(app_config.redis_url.as_str()).context("Invalid Redis URL")?;
    let redis = ConnectionManager::new(redis_client).await.context("Failed to connect to Redis")?;

    let mut workers = WorkerSet::new();
    let daily_refresh = start_workers(&mut workers, &app_config, &repo, &redis);
    info!("[Workers] {} background workers running", workers.len());

    let state = AppState::new(repo.pool().clone(), redis, daily_refresh);
    let app = router::build_router(state);
    let listener = server_utils::create_listener(&app_config.bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(server_utils::shutdown_signal())
        .await
        .context("Health server failed")?;

    workers.shutdown().await;
    info!("[Server] stopped");
    Ok(())
}

/// Build every enabled worker and spawn it under `workers`.
fn start_workers(
    workers: &mut WorkerSet,
    config: &AppConfig,
    repo: &Arc<PostgresAccountRepository>,
    redis: &ConnectionManager,
) -> Option<Arc<DailyUsageRefreshWorker>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let accounts: Arc<dyn AccountRepository> = repo.clone();
    let locker: Arc<dyn JobLocker> = Arc::new(PgAdvisoryLocker::new(repo.pool().clone()));
    let health = Arc::new(AccountHealthService::new(
        Arc::clone(&accounts),
        Arc::new(RedisTempUnschedCache::new(redis.clone())),
        Arc::clone(&clock),
        ClassifierSettings::from(&config.health),
    ));

    if config.recovery.enabled {
        let worker = Arc::new(TempUnschedRecoveryWorker::new(
            Arc::clone(&accounts),
            Arc::new(RedisLeaseQueue::new(redis.clone(), LeaseKeys::temp_unsched_recovery())),
            Arc::clone(&health),
            Arc::new(PlatformUsageSource::new(None)),
            QuotaWindowMonitor::new(config.usage_window.disable_percent),
            config.recovery.clone(),
            Arc::clone(&clock),
        ));
        workers.push("temp_unsched_recovery", worker.start(workers.subscribe()));
    }

    let scheduler = &config.scheduler;
    if scheduler.account_expiration_enabled {
        let worker = Arc::new(ExpirationWorker::accounts(
            Arc::clone(&accounts),
            Arc::clone(&locker),
            Duration::from_secs(scheduler.account_expiration_interval_secs),
        ));
        workers.push("account_expiration", worker.start(workers.subscribe()));
    }
    if scheduler.subscription_expiration_enabled {
        let worker = Arc::new(ExpirationWorker::subscriptions(
            Arc::clone(&accounts),
            Arc::clone(&locker),
            Duration::from_secs(scheduler.subscription_expiration_interval_secs),
        ));
        workers.push("subscription_expiration", worker.start(workers.subscribe()));
    }
    if scheduler.rate_limit_reactivate_enabled {
        let worker = Arc::new(RateLimitReactivateWorker::new(
            Arc::clone(&accounts),
            Arc::clone(&locker),
            Arc::clone(&clock),
            Duration::from_secs(scheduler.rate_limit_reactivate_interval_secs),
            scheduler.rate_limit_reactivate_batch,
        ));
        workers.push("rate_limit_reactivate", worker.start(workers.subscribe()));
    }

    if !scheduler.daily_usage_refresh_enabled {
        return None;
    }
    let worker = Arc::new(DailyUsageRefreshWorker::new(
        accounts,
        health,
        locker,
        clock,
        config.usage_window.clone(),
    ));
    if !worker.has_usage_source() {
        info!("[DailyUsageRefresh] disabled: no usage fetcher or codex prober configured");
        return None;
    }
    let started = Arc::clone(&worker);
    workers.push("daily_usage_refresh", started.start(workers.subscribe()));
    Some(worker)
}
