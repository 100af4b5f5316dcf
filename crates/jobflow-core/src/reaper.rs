use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::store::Store;

/// Periodically reclaims jobs whose lease expired without a heartbeat or
/// an ack — the recovery path for a crashed or partitioned worker. Runs
/// independently of any particular worker process; any number of reapers
/// racing each other is safe because `reclaim_expired` uses `SKIP LOCKED`.
pub struct Reaper {
    store: Store,
    interval: Duration,
    batch_size: i64,
}

impl Reaper {
    pub fn new(store: Store, config: &Config) -> Self {
        Self {
            store,
            interval: Duration::from_secs(config.reaper_interval_seconds),
            batch_size: config.reaper_batch,
        }
    }

    pub async fn tick(&self) -> anyhow::Result<u64> {
        let reclaimed = self.store.reclaim_expired(self.batch_size).await?;
        if reclaimed > 0 {
            info!(reclaimed, "reaper reclaimed expired leases");
        }
        Ok(reclaimed)
    }

    /// Runs forever, ticking on `interval`, until `shutdown` resolves.
    pub async fn run(self, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "reaper tick failed");
                    }
                }
                _ = &mut shutdown => {
                    info!("reaper shutting down");
                    break;
                }
            }
        }
    }
}
