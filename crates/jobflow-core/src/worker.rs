use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::HandlerError;
use crate::lease_manager::LeaseManager;
use crate::model::{AttemptOutcome, Job};
use crate::retry::RetryPolicy;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler is given to do its work. Handlers never see the `Store`
/// directly — they receive the job's identity and payload and report
/// success or failure, nothing else.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: Uuid,
    pub tenant_id: String,
    pub job_type: String,
    pub attempt: i32,
    pub worker_id: String,
}

pub type HandlerFn =
    Arc<dyn Fn(JobContext, serde_json::Value) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

struct HandlerEntry {
    handler: HandlerFn,
    timeout: Option<Duration>,
}

/// Maps `job_type` to the function that executes it. Unregistered types
/// fail fast with `HandlerError::unknown_handler` rather than hanging a
/// lease until it expires.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(job_type.into(), HandlerEntry { handler, timeout: None });
    }

    pub fn register_with_timeout(&mut self, job_type: impl Into<String>, handler: HandlerFn, timeout: Duration) {
        self.handlers
            .insert(job_type.into(), HandlerEntry { handler, timeout: Some(timeout) });
    }

    async fn run(&self, job_type: &str, ctx: JobContext, payload: serde_json::Value) -> Result<(), HandlerError> {
        let entry = self
            .handlers
            .get(job_type)
            .ok_or_else(|| HandlerError::unknown_handler(job_type))?;

        match entry.timeout {
            Some(timeout) => tokio::time::timeout(timeout, (entry.handler)(ctx, payload))
                .await
                .unwrap_or_else(|_| Err(HandlerError { code: "TIMEOUT".to_string(), message: "handler timed out".to_string() })),
            None => (entry.handler)(ctx, payload).await,
        }
    }
}

/// Orchestrates the claim -> dispatch -> ack loop for one process. Each
/// claimed job runs as its own task so a slow handler never blocks the
/// rest of the batch; a lightweight heartbeat task keeps its lease alive
/// for as long as the handler is actually running.
pub struct Worker {
    lease_manager: LeaseManager,
    registry: Arc<HandlerRegistry>,
    retry_policy: RetryPolicy,
    max_in_flight: usize,
    heartbeat_fraction: f64,
}

impl Worker {
    pub fn new(lease_manager: LeaseManager, registry: HandlerRegistry, config: &Config) -> Self {
        Self {
            lease_manager,
            registry: Arc::new(registry),
            retry_policy: RetryPolicy {
                base_seconds: config.retry_base_seconds,
                cap_seconds: config.retry_cap_seconds,
            },
            max_in_flight: config.worker_max_in_flight,
            heartbeat_fraction: config.heartbeat_fraction,
        }
    }

    /// Claims and fully processes one batch. Returns the number of jobs
    /// processed (not necessarily succeeded).
    pub async fn run_once(&mut self) -> anyhow::Result<usize> {
        let jobs = self.lease_manager.claim_next_batch().await?;
        if jobs.is_empty() {
            return Ok(0);
        }

        let mut join_set: JoinSet<()> = JoinSet::new();
        let mut processed = 0usize;

        for job in jobs {
            if join_set.len() >= self.max_in_flight {
                join_set.join_next().await;
            }
            processed += 1;
            self.spawn_job(&mut join_set, job);
        }

        while join_set.join_next().await.is_some() {}
        Ok(processed)
    }

    pub fn current_poll_interval(&self) -> Duration {
        self.lease_manager.current_poll_interval()
    }

    fn spawn_job(&self, join_set: &mut JoinSet<()>, job: Job) {
        let store = self.lease_manager.store().clone();
        let worker_id = self.lease_manager.worker_id().to_string();
        let registry = Arc::clone(&self.registry);
        let retry_policy = self.retry_policy;
        let lease_duration = self.lease_manager.lease_duration();
        let heartbeat_period = self.lease_manager.heartbeat_interval(self.heartbeat_fraction);

        join_set.spawn(async move {
            let job_id = job.id;

            if let Err(e) = store.mark_running(job_id, &worker_id).await {
                warn!(%job_id, error = %e, "could not mark job running, skipping");
                return;
            }

            let attempt = match store.start_attempt(job_id, &worker_id).await {
                Ok(a) => a,
                Err(e) => {
                    error!(%job_id, error = %e, "failed to record attempt start");
                    return;
                }
            };

            let ctx = JobContext {
                job_id,
                tenant_id: job.tenant_id.clone(),
                job_type: job.job_type.clone(),
                attempt: job.attempts,
                worker_id: worker_id.clone(),
            };

            let handler_future = registry.run(&job.job_type, ctx, job.payload.clone());
            tokio::pin!(handler_future);

            let mut ticker = tokio::time::interval(heartbeat_period);
            ticker.tick().await; // first tick fires immediately

            let result = loop {
                tokio::select! {
                    result = &mut handler_future => break result,
                    _ = ticker.tick() => {
                        if let Err(e) = store.extend_lease(job_id, &worker_id, lease_duration).await {
                            warn!(%job_id, error = %e, "heartbeat failed, handler will race the lease expiry");
                        }
                    }
                }
            };

            match result {
                Ok(()) => {
                    if let Err(e) = store.finish_attempt(attempt.id, AttemptOutcome::Succeeded, None).await {
                        error!(%job_id, error = %e, "failed to record attempt success");
                    }
                    if let Err(e) = store.ack_success(job_id, &worker_id).await {
                        error!(%job_id, error = %e, "ack_success failed");
                    } else {
                        info!(%job_id, "job succeeded");
                    }
                }
                Err(handler_err) => {
                    let message = handler_err.to_string();

                    if handler_err.code == "UNKNOWN_HANDLER" {
                        match store.ack_fatal(job_id, &worker_id, &message).await {
                            Ok(()) => {
                                let _ = store
                                    .finish_attempt(attempt.id, AttemptOutcome::DeadLettered, Some(&message))
                                    .await;
                                warn!(%job_id, error = %message, "job dead-lettered: no handler registered");
                            }
                            Err(e) => error!(%job_id, error = %e, "ack_fatal failed"),
                        }
                        return;
                    }

                    match store.ack_failure(job_id, &worker_id, &message, retry_policy).await {
                        Ok(AttemptOutcome::DeadLettered) => {
                            let _ = store
                                .finish_attempt(attempt.id, AttemptOutcome::DeadLettered, Some(&message))
                                .await;
                            warn!(%job_id, error = %message, "job dead-lettered");
                        }
                        Ok(_) => {
                            let _ = store
                                .finish_attempt(attempt.id, AttemptOutcome::Retried, Some(&message))
                                .await;
                            info!(%job_id, error = %message, "job scheduled for retry");
                        }
                        Err(e) => {
                            error!(%job_id, error = %e, "ack_failure failed");
                        }
                    }
                }
            }
        });
    }
}
