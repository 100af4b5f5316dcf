use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::StoreError;
use crate::model::Job;
use crate::store::Store;

/// Owns the claim protocol on behalf of a worker process: batched claims
/// with jittered poll backoff when the queue is empty, and periodic
/// heartbeats so a lease survives as long as the job is genuinely running.
pub struct LeaseManager {
    store: Store,
    worker_id: String,
    batch_size: i64,
    lease_duration: Duration,
    tenant_concurrency_limit: i64,
    poll_interval_min: Duration,
    poll_interval_max: Duration,
    current_poll_interval: Duration,
}

impl LeaseManager {
    pub fn new(store: Store, config: &Config) -> Self {
        let (min, max) = config.poll_interval_bounds();
        Self {
            store,
            worker_id: config.worker_id.clone(),
            batch_size: config.worker_batch_size,
            lease_duration: config.lease_duration(),
            tenant_concurrency_limit: config.tenant_concurrency_limit,
            poll_interval_min: min,
            poll_interval_max: max,
            current_poll_interval: min,
        }
    }

    /// Claims the next batch. Grows the poll interval (capped) on an empty
    /// result and resets it to the minimum as soon as work is found, so an
    /// idle worker doesn't hammer the database but a busy one stays snappy.
    pub async fn claim_next_batch(&mut self) -> Result<Vec<Job>, StoreError> {
        let jobs = self
            .store
            .claim_batch(
                &self.worker_id,
                self.batch_size,
                self.lease_duration,
                self.tenant_concurrency_limit,
            )
            .await?;

        if jobs.is_empty() {
            self.current_poll_interval = (self.current_poll_interval * 2).min(self.poll_interval_max);
        } else {
            self.current_poll_interval = self.poll_interval_min;
            debug!(count = jobs.len(), worker_id = %self.worker_id, "claimed batch");
        }

        Ok(jobs)
    }

    pub fn current_poll_interval(&self) -> Duration {
        self.current_poll_interval
    }

    pub async fn heartbeat(&self, job_id: Uuid) -> Result<(), StoreError> {
        match self.store.extend_lease(job_id, &self.worker_id, self.lease_duration).await {
            Ok(()) => Ok(()),
            Err(StoreError::LeaseLost { job_id }) => {
                warn!(%job_id, worker_id = %self.worker_id, "lease lost during heartbeat");
                Err(StoreError::LeaseLost { job_id })
            }
            Err(e) => Err(e),
        }
    }

    pub fn heartbeat_interval(&self, heartbeat_fraction: f64) -> Duration {
        self.lease_duration.mul_f64(heartbeat_fraction.clamp(0.05, 0.9))
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
