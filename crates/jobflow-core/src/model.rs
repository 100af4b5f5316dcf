use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduling priority. Heavier weight is considered first within a tenant's
/// queued jobs, but never starves lower priorities across tenants — fairness
/// is enforced by `tenant_concurrency_limit`, not by priority alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_priority", rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub fn weight(self) -> i32 {
        match self {
            Priority::Critical => 3,
            Priority::High => 2,
            Priority::Normal => 1,
            Priority::Low => 0,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Leased,
    Running,
    Succeeded,
    Failed,
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Leased => "leased",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }
}

/// A unit of work as stored in the `jobs` table. Field names follow the
/// lifecycle described for the queue: a job is born `queued`, moves through
/// `leased`/`running` under a single worker's lease, and ends at
/// `succeeded` or `dead_letter` (with `failed` as the transient state a
/// retry passes through before going back to `queued`).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub tenant_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_attempts: i32,
    pub idempotency_key: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub leased_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for `Store::insert_if_absent`. Does not carry any of the
/// fields the store itself owns (`id`, `status`, `attempts`, timestamps).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub tenant_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub max_attempts: i32,
    pub idempotency_key: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

impl NewJob {
    pub fn new(tenant_id: impl Into<String>, job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            job_type: job_type.into(),
            payload,
            priority: Priority::Normal,
            max_attempts: 5,
            idempotency_key: None,
            scheduled_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Retried,
    DeadLettered,
    LeaseLost,
    ReclaimedToDeadLetter,
}

/// Append-only history row. Never gates a state transition; exists so an
/// operator can answer "what happened to this job" after the fact.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt_no: i32,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<AttemptOutcome>,
    pub error_message: Option<String>,
}

/// Filter accepted by `Submitter::list` / `Store::list`.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub tenant_id: Option<String>,
    pub status: Option<JobStatus>,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<Uuid>,
}
