use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::error::SubmitError;
use crate::model::{Job, JobFilter, JobStatus, NewJob, Page};
use crate::rate_limiter::RateLimiter;
use crate::store::Store;

/// The only door into the queue for callers submitting work. Validates the
/// request, applies per-tenant rate limiting, and hands off to
/// `Store::insert_if_absent`. Every other `Store` read operation is
/// re-exposed here so a caller never needs to reach past the Submitter.
pub struct Submitter {
    store: Store,
    rate_limiter: Arc<RateLimiter>,
    max_payload_bytes: usize,
}

impl Submitter {
    pub fn new(store: Store, config: &Config) -> Self {
        Self {
            store,
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit_per_minute, config.rate_burst_multiplier)),
            max_payload_bytes: config.max_payload_bytes,
        }
    }

    pub async fn submit(&self, new_job: NewJob) -> Result<Job, SubmitError> {
        if new_job.tenant_id.trim().is_empty() {
            return Err(SubmitError::InvalidInput("tenant_id must not be empty".to_string()));
        }
        if new_job.job_type.trim().is_empty() {
            return Err(SubmitError::InvalidInput("job_type must not be empty".to_string()));
        }
        if !(1..=100).contains(&new_job.max_attempts) {
            return Err(SubmitError::InvalidInput("max_attempts must be between 1 and 100".to_string()));
        }

        let payload_bytes = serde_json::to_vec(&new_job.payload)
            .map_err(|e| SubmitError::InvalidInput(format!("payload is not valid json: {e}")))?
            .len();
        if payload_bytes > self.max_payload_bytes {
            return Err(SubmitError::InvalidInput(format!(
                "payload of {payload_bytes} bytes exceeds limit of {}",
                self.max_payload_bytes
            )));
        }

        if !self.rate_limiter.try_acquire(&new_job.tenant_id) {
            let retry_after_ms = self.rate_limiter.retry_after_ms(&new_job.tenant_id);
            warn!(tenant_id = %new_job.tenant_id, retry_after_ms, "submission rate limited");
            return Err(SubmitError::RateLimited {
                tenant_id: new_job.tenant_id,
                retry_after_ms,
            });
        }

        Ok(self.store.insert_if_absent(new_job).await?)
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>, SubmitError> {
        Ok(self.store.get(job_id).await?)
    }

    pub async fn list(&self, filter: JobFilter, limit: i64, cursor: Option<Uuid>) -> Result<Page<Job>, SubmitError> {
        Ok(self.store.list(filter, limit, cursor).await?)
    }

    pub async fn retry_from_dead_letter(&self, job_id: Uuid) -> Result<Job, SubmitError> {
        Ok(self.store.revive_from_dead_letter(job_id).await?)
    }

    pub async fn stats(&self, tenant_id: Option<&str>) -> Result<HashMap<JobStatus, i64>, SubmitError> {
        Ok(self.store.counts_by_state(tenant_id).await?)
    }
}
