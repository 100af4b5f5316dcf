use uuid::Uuid;

/// Errors that can cross the `Store` boundary. Mirrors the queue's error
/// taxonomy by kind, not by SQL detail — callers branch on the variant, not
/// on the message.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("lease lost for job {job_id}")]
    LeaseLost { job_id: Uuid },

    #[error("invalid state for job {job_id}: {message}")]
    InvalidState { job_id: Uuid, message: String },
}

/// Errors raised validating or admitting a submission, before it ever
/// reaches the store.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rate limited: tenant {tenant_id} retry after {retry_after_ms}ms")]
    RateLimited { tenant_id: String, retry_after_ms: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Raised by a job handler, or synthesized by the worker when no handler is
/// registered for a job's `job_type`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct HandlerError {
    pub code: String,
    pub message: String,
}

impl HandlerError {
    pub fn unknown_handler(job_type: &str) -> Self {
        Self {
            code: "UNKNOWN_HANDLER".to_string(),
            message: format!("no handler registered for job_type {job_type:?}"),
        }
    }

    pub fn handler_failure(message: impl Into<String>) -> Self {
        Self {
            code: "HANDLER_FAILURE".to_string(),
            message: message.into(),
        }
    }
}
