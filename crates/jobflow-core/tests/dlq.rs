mod common;

use serial_test::serial;

use std::time::Duration;

use common::setup_db;
use jobflow_core::{AttemptOutcome, JobStatus, NewJob, RetryPolicy, Store};

#[tokio::test]
#[serial]
async fn exhausted_retries_move_job_to_dead_letter() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    let mut new_job = NewJob::new("tenant-a", "always_fail", serde_json::json!({}));
    new_job.max_attempts = 2;
    store.insert_if_absent(new_job).await.unwrap();

    let policy = RetryPolicy { base_seconds: 0, cap_seconds: 1 };

    // attempt 1 fails -> retried
    let claimed = store.claim_batch("worker-a", 1, Duration::from_secs(30), 10).await.unwrap();
    let job_id = claimed[0].id;
    let outcome = store.ack_failure(job_id, "worker-a", "boom", policy).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::Retried);

    // force run_at into the past so it's claimable again
    sqlx::query("UPDATE jobs SET scheduled_at = now() - interval '1 second' WHERE id = $1")
        .bind(job_id)
        .execute(store.pool())
        .await
        .unwrap();

    // attempt 2 fails -> exhausted, dead-lettered
    let claimed_again = store.claim_batch("worker-a", 1, Duration::from_secs(30), 10).await.unwrap();
    assert_eq!(claimed_again[0].id, job_id);
    let outcome = store.ack_failure(job_id, "worker-a", "boom again", policy).await.unwrap();
    assert_eq!(outcome, AttemptOutcome::DeadLettered);

    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::DeadLetter);
    assert_eq!(job.last_error.as_deref(), Some("boom again"));
}

#[tokio::test]
#[serial]
async fn retry_backoff_increases_scheduled_at_each_time() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    let mut new_job = NewJob::new("tenant-a", "always_fail", serde_json::json!({}));
    new_job.max_attempts = 10;
    store.insert_if_absent(new_job).await.unwrap();

    let policy = RetryPolicy { base_seconds: 1, cap_seconds: 600 };

    let claimed = store.claim_batch("worker-a", 1, Duration::from_secs(30), 10).await.unwrap();
    let job_id = claimed[0].id;
    store.ack_failure(job_id, "worker-a", "t1", policy).await.unwrap();
    let after_first = store.get(job_id).await.unwrap().unwrap().scheduled_at;

    sqlx::query("UPDATE jobs SET scheduled_at = now() - interval '1 second' WHERE id = $1")
        .bind(job_id)
        .execute(store.pool())
        .await
        .unwrap();

    let claimed = store.claim_batch("worker-a", 1, Duration::from_secs(30), 10).await.unwrap();
    store.ack_failure(claimed[0].id, "worker-a", "t2", policy).await.unwrap();
    let after_second = store.get(job_id).await.unwrap().unwrap().scheduled_at;

    assert!(after_second > after_first, "second backoff should push scheduled_at further out");
}

#[tokio::test]
#[serial]
async fn revive_from_dead_letter_requeues_the_job() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    let mut new_job = NewJob::new("tenant-a", "always_fail", serde_json::json!({}));
    new_job.max_attempts = 1;
    store.insert_if_absent(new_job).await.unwrap();

    let claimed = store.claim_batch("worker-a", 1, Duration::from_secs(30), 10).await.unwrap();
    let job_id = claimed[0].id;
    let outcome = store
        .ack_failure(job_id, "worker-a", "doomed", RetryPolicy::default())
        .await
        .unwrap();
    assert_eq!(outcome, AttemptOutcome::DeadLettered);

    let revived = store.revive_from_dead_letter(job_id).await.unwrap();
    assert_eq!(revived.status, JobStatus::Queued);
    assert_eq!(revived.attempts, 0);

    let claimable = store.claim_batch("worker-b", 1, Duration::from_secs(30), 10).await.unwrap();
    assert_eq!(claimable.len(), 1);
    assert_eq!(claimable[0].id, job_id);
}
