mod handlers;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobflow_core::{Config, LeaseManager, Reaper, Store, Worker};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobflow=info")))
        .init();

    let config = Config::from_env()?;
    let pool = jobflow_core::db::make_pool(&config.database_url).await?;

    if config.migrate_on_startup {
        jobflow_core::db::run_migrations(&pool).await?;
    }

    let store = Store::new(pool);
    let lease_manager = LeaseManager::new(store.clone(), &config);
    let registry = handlers::build_registry();
    let mut worker = Worker::new(lease_manager, registry, &config);
    let reaper = Reaper::new(store, &config);
    let grace_period = Duration::from_secs(config.grace_period_seconds);

    let (reaper_shutdown_tx, reaper_shutdown_rx) = tokio::sync::oneshot::channel();
    let reaper_handle = tokio::spawn(reaper.run(reaper_shutdown_rx));

    tracing::info!(worker_id = %config.worker_id, "jobflow-worker starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_watcher = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received, draining in-flight batch");
        shutdown_watcher.store(true, Ordering::SeqCst);
    });

    // `run_once` always awaits every spawned job to completion before
    // returning, so a batch already claimed when shutdown fires is never
    // aborted mid-handler — only the *next* claim is skipped once the flag
    // is observed. If draining that last batch takes longer than
    // `grace_period`, we log it but still wait: killing a handler
    // mid-execution would leave its job leased with no ack recorded.
    while !shutdown.load(Ordering::SeqCst) {
        let started = tokio::time::Instant::now();
        match worker.run_once().await {
            Ok(0) => tokio::time::sleep(worker.current_poll_interval()).await,
            Ok(_) => {
                if shutdown.load(Ordering::SeqCst) && started.elapsed() > grace_period {
                    tracing::warn!(elapsed = ?started.elapsed(), "final batch took longer than grace_period to drain");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "worker batch failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    let _ = reaper_shutdown_tx.send(());
    let _ = reaper_handle.await;

    Ok(())
}
