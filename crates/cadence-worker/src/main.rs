//! Process wiring: load configuration, open the database, and run the
//! scheduler sweep and generation worker as two independent loops until a
//! shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use cadence_core::db::establish_connection;
use cadence_core::repository::SqliteRepository;
use cadence_core::service::{OperationContext, Service};
use cadence_core::worker::TickOutcome;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::AppConfig;

const IDLE_POLL_INTERVAL: StdDuration = StdDuration::from_millis(500);
const ERROR_BACKOFF: StdDuration = StdDuration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cadence_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let worker_id = config.worker_id();
    tracing::info!(worker_id = %worker_id, storage_dsn = %config.storage_dsn, "starting cadence worker");

    let pool = establish_connection(&config.storage_dsn)
        .await
        .context("failed to establish database connection")?;
    let repository = Arc::new(SqliteRepository::new(pool));
    let service = Arc::new(Service::new(repository, config.to_service_config()));

    let shutdown = CancellationToken::new();

    let scheduler_handle = tokio::spawn(run_scheduler_loop(
        service.clone(),
        config.scheduler_interval(),
        shutdown.clone(),
    ));
    let worker_handle = tokio::spawn(run_worker_loop(service.clone(), shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    tracing::info!("shutdown signal received, stopping scheduler and worker loops");
    shutdown.cancel();

    let (scheduler_result, worker_result) = tokio::join!(scheduler_handle, worker_handle);
    scheduler_result.context("scheduler loop task panicked")?;
    worker_result.context("worker loop task panicked")?;

    Ok(())
}

async fn run_scheduler_loop(
    service: Arc<Service<SqliteRepository>>,
    interval: StdDuration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("scheduler loop stopping");
                return;
            }
            _ = ticker.tick() => {
                let ctx = OperationContext::new();
                match service.run_schedule_once(&ctx).await {
                    Ok(outcome) => tracing::debug!(?outcome, "scheduler sweep completed"),
                    Err(err) => tracing::error!(error = %err, "scheduler sweep failed"),
                }
            }
        }
    }
}

async fn run_worker_loop(service: Arc<Service<SqliteRepository>>, shutdown: CancellationToken) {
    loop {
        let ctx = OperationContext::new();
        match service.run_process_once(&ctx).await {
            Ok(TickOutcome::Idle) => {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("worker loop stopping");
                        return;
                    }
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                }
            }
            Ok(outcome) => {
                tracing::debug!(?outcome, "worker tick completed");
                if shutdown.is_cancelled() {
                    tracing::info!("worker loop stopping");
                    return;
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "worker tick failed");
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("worker loop stopping");
                        return;
                    }
                    _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                }
            }
        }
    }
}
