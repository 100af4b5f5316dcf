use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{AttemptOutcome, Job, JobAttempt, JobFilter, JobStatus, NewJob, Page};
use crate::retry::RetryPolicy;

/// The transactional core. Every method here either is a single statement
/// or wraps a single `sqlx::Transaction` — no method holds a transaction
/// open across an `.await` that waits on caller-supplied work.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts a new job unless one with the same `(tenant_id,
    /// idempotency_key)` already exists, in which case the existing row is
    /// returned unchanged. A resubmission is indistinguishable from the
    /// first submission to the caller.
    pub async fn insert_if_absent(&self, new_job: NewJob) -> Result<Job, StoreError> {
        if let Some(key) = new_job.idempotency_key.as_deref() {
            let existing = sqlx::query_as::<_, Job>(
                r#"SELECT * FROM jobs WHERE tenant_id = $1 AND idempotency_key = $2"#,
            )
            .bind(&new_job.tenant_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(job) = existing {
                return Ok(job);
            }
        }

        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (tenant_id, job_type, payload, priority, max_attempts, idempotency_key, scheduled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, idempotency_key) WHERE idempotency_key IS NOT NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&new_job.tenant_id)
        .bind(&new_job.job_type)
        .bind(&new_job.payload)
        .bind(new_job.priority)
        .bind(new_job.max_attempts)
        .bind(&new_job.idempotency_key)
        .bind(new_job.scheduled_at)
        .fetch_optional(&self.pool)
        .await?;

        match inserted {
            Some(job) => Ok(job),
            None => {
                // Lost the insert race to a concurrent identical submission.
                let key = new_job
                    .idempotency_key
                    .as_deref()
                    .expect("ON CONFLICT only fires when idempotency_key is set");
                let job = sqlx::query_as::<_, Job>(
                    r#"SELECT * FROM jobs WHERE tenant_id = $1 AND idempotency_key = $2"#,
                )
                .bind(&new_job.tenant_id)
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
                Ok(job)
            }
        }
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let job = sqlx::query_as::<_, Job>(r#"SELECT * FROM jobs WHERE id = $1"#)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Claims up to `batch_size` queued, due jobs for `worker_id`, skipping
    /// any row whose tenant is already at `tenant_concurrency_limit`
    /// in-flight jobs. Candidates are locked with `FOR UPDATE SKIP LOCKED`
    /// so two workers racing this query never claim the same row.
    pub async fn claim_batch(
        &self,
        worker_id: &str,
        batch_size: i64,
        lease_duration: Duration,
        tenant_concurrency_limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let overfetch = (batch_size * 5).max(batch_size).min(2000);
        let candidates = sqlx::query_as::<_, Job>(
            r#"
            SELECT *
            FROM jobs
            WHERE status = 'queued' AND scheduled_at <= now()
            ORDER BY job_priority_weight(priority) DESC, scheduled_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(overfetch)
        .fetch_all(&mut *tx)
        .await?;

        let mut tenant_in_flight: HashMap<String, i64> = HashMap::new();
        let mut claimed_ids = Vec::new();

        for candidate in &candidates {
            if claimed_ids.len() as i64 >= batch_size {
                break;
            }

            let current = match tenant_in_flight.get(&candidate.tenant_id) {
                Some(count) => *count,
                None => {
                    let count: i64 = sqlx::query_scalar(
                        r#"SELECT count(*) FROM jobs WHERE tenant_id = $1 AND status IN ('leased', 'running')"#,
                    )
                    .bind(&candidate.tenant_id)
                    .fetch_one(&mut *tx)
                    .await?;
                    tenant_in_flight.insert(candidate.tenant_id.clone(), count);
                    count
                }
            };

            if current >= tenant_concurrency_limit {
                continue;
            }

            claimed_ids.push(candidate.id);
            tenant_in_flight.insert(candidate.tenant_id.clone(), current + 1);
        }

        if claimed_ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let lease_expires_at = Utc::now() + chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::seconds(30));

        let claimed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'leased',
                leased_by = $2,
                lease_expires_at = $3,
                attempts = attempts + 1,
                updated_at = now()
            WHERE id = ANY($1)
            RETURNING *
            "#,
        )
        .bind(&claimed_ids)
        .bind(worker_id)
        .bind(lease_expires_at)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(claimed)
    }

    pub async fn mark_running(&self, job_id: Uuid, worker_id: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running', updated_at = now()
            WHERE id = $1 AND leased_by = $2 AND status = 'leased'
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::LeaseLost { job_id });
        }
        Ok(())
    }

    pub async fn extend_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease_duration: Duration,
    ) -> Result<(), StoreError> {
        let lease_expires_at = Utc::now() + chrono::Duration::from_std(lease_duration).unwrap_or(chrono::Duration::seconds(30));

        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = $3, updated_at = now()
            WHERE id = $1 AND leased_by = $2 AND status IN ('leased', 'running')
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(lease_expires_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::LeaseLost { job_id });
        }
        Ok(())
    }

    pub async fn ack_success(&self, job_id: Uuid, worker_id: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded', leased_by = NULL, lease_expires_at = NULL, updated_at = now()
            WHERE id = $1 AND leased_by = $2 AND lease_expires_at > now()
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::LeaseLost { job_id });
        }
        Ok(())
    }

    /// Dead-letters a job without consuming a retry. Used when the failure
    /// is not the kind a retry could ever fix (no handler registered for
    /// its `job_type`), so the normal `ack_failure` retry accounting is
    /// bypassed entirely.
    pub async fn ack_fatal(&self, job_id: Uuid, worker_id: &str, error: &str) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dead_letter', leased_by = NULL, lease_expires_at = NULL,
                last_error = $3, updated_at = now()
            WHERE id = $1 AND leased_by = $2 AND lease_expires_at > now()
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::LeaseLost { job_id });
        }
        Ok(())
    }

    /// Decides retry vs. dead-letter and applies it atomically. Returns
    /// which path was taken so the caller can log/record it.
    pub async fn ack_failure(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        policy: RetryPolicy,
    ) -> Result<AttemptOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Job>(
            r#"SELECT * FROM jobs WHERE id = $1 FOR UPDATE"#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::LeaseLost { job_id })?;

        let lease_still_held = row.lease_expires_at.map_or(false, |exp| exp > Utc::now());
        if row.leased_by.as_deref() != Some(worker_id) || !lease_still_held {
            return Err(StoreError::LeaseLost { job_id });
        }

        if row.attempts >= row.max_attempts {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_letter', leased_by = NULL, lease_expires_at = NULL,
                    last_error = $2, updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job_id)
            .bind(error)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(AttemptOutcome::DeadLettered);
        }

        let mut rng = rand::thread_rng();
        let delay = crate::retry::backoff_seconds(row.attempts, policy, &mut rng);
        let scheduled_at = Utc::now() + chrono::Duration::milliseconds((delay * 1000.0) as i64);

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued', leased_by = NULL, lease_expires_at = NULL,
                last_error = $2, scheduled_at = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(error)
        .bind(scheduled_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(AttemptOutcome::Retried)
    }

    /// Reclaims jobs whose lease has expired without being extended or
    /// acked — the crash-recovery path. A job that still has retries left
    /// goes back to `queued`; a job abandoned on its last attempt goes
    /// straight to `dead_letter` rather than being requeued only to exhaust
    /// its last attempt on the next claim. Returns the number reclaimed.
    pub async fn reclaim_expired(&self, batch_size: i64) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let expired = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE status IN ('leased', 'running') AND lease_expires_at < now()
            ORDER BY lease_expires_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(batch_size)
        .fetch_all(&mut *tx)
        .await?;

        if expired.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        let mut requeue_ids = Vec::new();
        let mut dead_letter_ids = Vec::new();
        for job in &expired {
            if job.attempts >= job.max_attempts {
                dead_letter_ids.push(job.id);
            } else {
                requeue_ids.push(job.id);
            }
        }

        if !requeue_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'queued', leased_by = NULL, lease_expires_at = NULL, updated_at = now()
                WHERE id = ANY($1)
                "#,
            )
            .bind(&requeue_ids)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE job_attempts
                SET outcome = 'lease_lost', finished_at = now()
                WHERE job_id = ANY($1) AND finished_at IS NULL
                "#,
            )
            .bind(&requeue_ids)
            .execute(&mut *tx)
            .await?;
        }

        if !dead_letter_ids.is_empty() {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead_letter', leased_by = NULL, lease_expires_at = NULL,
                    last_error = 'lease expired after exhausting all attempts', updated_at = now()
                WHERE id = ANY($1)
                "#,
            )
            .bind(&dead_letter_ids)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                UPDATE job_attempts
                SET outcome = 'reclaimed_to_dead_letter', finished_at = now()
                WHERE job_id = ANY($1) AND finished_at IS NULL
                "#,
            )
            .bind(&dead_letter_ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(expired.len() as u64)
    }

    pub async fn revive_from_dead_letter(&self, job_id: Uuid) -> Result<Job, StoreError> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'queued', attempts = 0, lease_expires_at = NULL,
                leased_by = NULL, last_error = NULL, scheduled_at = now(), updated_at = now()
            WHERE id = $1 AND status = 'dead_letter'
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::InvalidState {
            job_id,
            message: "job is not in dead_letter".to_string(),
        })?;

        Ok(job)
    }

    pub async fn counts_by_state(&self, tenant_id: Option<&str>) -> Result<HashMap<JobStatus, i64>, StoreError> {
        let rows: Vec<(JobStatus, i64)> = sqlx::query_as(
            r#"
            SELECT status, count(*)
            FROM jobs
            WHERE $1::text IS NULL OR tenant_id = $1
            GROUP BY status
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().collect())
    }

    pub async fn list(&self, filter: JobFilter, limit: i64, cursor: Option<Uuid>) -> Result<Page<Job>, StoreError> {
        let limit = limit.clamp(1, 500);

        let status = filter.status;
        let tenant_id = filter.tenant_id.as_deref();

        let items = sqlx::query_as::<_, Job>(
            r#"
            SELECT * FROM jobs
            WHERE ($1::text IS NULL OR tenant_id = $1)
              AND ($2::job_status IS NULL OR status = $2)
              AND ($3::uuid IS NULL OR id > $3)
            ORDER BY id ASC
            LIMIT $4
            "#,
        )
        .bind(tenant_id)
        .bind(status)
        .bind(cursor)
        .bind(limit + 1)
        .fetch_all(&self.pool)
        .await?;

        let next_cursor = if items.len() as i64 > limit {
            items.get(limit as usize - 1).map(|j| j.id)
        } else {
            None
        };

        let mut items = items;
        items.truncate(limit as usize);

        Ok(Page { items, next_cursor })
    }

    pub async fn attempts_for_job(&self, job_id: Uuid) -> Result<Vec<JobAttempt>, StoreError> {
        let rows = sqlx::query_as::<_, JobAttempt>(
            r#"SELECT * FROM job_attempts WHERE job_id = $1 ORDER BY attempt_no ASC"#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn start_attempt(&self, job_id: Uuid, worker_id: &str) -> Result<JobAttempt, StoreError> {
        let attempt = sqlx::query_as::<_, JobAttempt>(
            r#"
            INSERT INTO job_attempts (job_id, attempt_no, worker_id)
            VALUES (
                $1,
                COALESCE((SELECT MAX(attempt_no) FROM job_attempts WHERE job_id = $1), 0) + 1,
                $2
            )
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(attempt)
    }

    pub async fn finish_attempt(
        &self,
        attempt_id: Uuid,
        outcome: AttemptOutcome,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE job_attempts
            SET finished_at = now(), outcome = $2, error_message = $3
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(outcome)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
