//! Core of a multi-tenant distributed job queue backed by PostgreSQL.
//!
//! The transactional protocol — claim-and-lease with `FOR UPDATE SKIP
//! LOCKED`, lease heartbeats, crash recovery via a reaper, exponential
//! backoff with jitter, and per-tenant fairness — lives entirely in this
//! crate. `jobflow-worker` and `jobflow-cli` are thin binaries built on
//! top of it.

pub mod config;
pub mod db;
pub mod error;
pub mod lease_manager;
pub mod model;
pub mod rate_limiter;
pub mod reaper;
pub mod retry;
pub mod store;
pub mod submitter;
pub mod worker;

pub use config::Config;
pub use error::{HandlerError, StoreError, SubmitError};
pub use lease_manager::LeaseManager;
pub use model::{AttemptOutcome, Job, JobAttempt, JobFilter, JobStatus, NewJob, Page, Priority};
pub use rate_limiter::RateLimiter;
pub use reaper::Reaper;
pub use retry::{backoff_seconds, RetryPolicy};
pub use store::Store;
pub use submitter::Submitter;
pub use worker::{HandlerFn, HandlerRegistry, JobContext, Worker};
