mod common;

use serial_test::serial;

use std::collections::HashSet;
use std::time::Duration;

use common::{new_job, new_job_with_priority, setup_db};
use jobflow_core::{JobStatus, Priority, Store};

#[tokio::test]
#[serial]
async fn two_workers_never_claim_the_same_job() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    store.insert_if_absent(new_job("tenant-a")).await.unwrap();

    let (a, b) = tokio::join!(
        store.claim_batch("worker-a", 1, Duration::from_secs(30), 10),
        store.claim_batch("worker-b", 1, Duration::from_secs(30), 10),
    );

    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(a.len() + b.len(), 1, "exactly one worker should have claimed the job");
}

#[tokio::test]
#[serial]
async fn lease_expiry_allows_another_worker_to_reclaim() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    store.insert_if_absent(new_job("tenant-a")).await.unwrap();

    let claimed = store
        .claim_batch("worker-a", 1, Duration::from_millis(500), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let job_id = claimed[0].id;

    tokio::time::sleep(Duration::from_millis(700)).await;

    let reclaimed = store.reclaim_expired(100).await.unwrap();
    assert_eq!(reclaimed, 1);

    let claimed_again = store
        .claim_batch("worker-b", 1, Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert_eq!(claimed_again.len(), 1);
    assert_eq!(claimed_again[0].id, job_id);
}

#[tokio::test]
#[serial]
async fn lease_expiry_on_last_attempt_dead_letters_instead_of_requeuing() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    let mut job = new_job("tenant-a");
    job.max_attempts = 1;
    store.insert_if_absent(job).await.unwrap();

    let claimed = store
        .claim_batch("worker-a", 1, Duration::from_millis(500), 10)
        .await
        .unwrap();
    assert_eq!(claimed.len(), 1);
    let job_id = claimed[0].id;

    tokio::time::sleep(Duration::from_millis(700)).await;

    let reclaimed = store.reclaim_expired(100).await.unwrap();
    assert_eq!(reclaimed, 1);

    let job = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::DeadLetter, "job already on its last attempt should not be requeued");
}

#[tokio::test]
#[serial]
async fn claim_order_prefers_priority_then_scheduled_at() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    let low = store
        .insert_if_absent(new_job_with_priority("tenant-a", Priority::Low))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    let high = store
        .insert_if_absent(new_job_with_priority("tenant-a", Priority::High))
        .await
        .unwrap();

    let claimed = store
        .claim_batch("worker-a", 10, Duration::from_secs(30), 10)
        .await
        .unwrap();

    assert_eq!(claimed.len(), 2);
    assert_eq!(claimed[0].id, high.id, "higher priority job should be claimed first");
    assert_eq!(claimed[1].id, low.id);
}

#[tokio::test]
#[serial]
async fn future_scheduled_job_is_not_claimed_early() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    let mut job = new_job("tenant-a");
    job.scheduled_at = chrono::Utc::now() + chrono::Duration::seconds(2);
    store.insert_if_absent(job).await.unwrap();

    let early = store
        .claim_batch("worker-a", 10, Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert!(early.is_empty(), "job should not be claimable before scheduled_at");

    tokio::time::sleep(Duration::from_millis(2300)).await;

    let later = store
        .claim_batch("worker-a", 10, Duration::from_secs(30), 10)
        .await
        .unwrap();
    assert_eq!(later.len(), 1);
}

#[tokio::test]
#[serial]
async fn tenant_concurrency_limit_is_enforced_at_claim_time() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    for _ in 0..5 {
        store.insert_if_absent(new_job("tenant-a")).await.unwrap();
    }

    let claimed = store
        .claim_batch("worker-a", 10, Duration::from_secs(30), 2)
        .await
        .unwrap();

    assert_eq!(claimed.len(), 2, "claim should stop at the tenant concurrency limit");

    let claimed_more = store
        .claim_batch("worker-a", 10, Duration::from_secs(30), 2)
        .await
        .unwrap();
    assert!(claimed_more.is_empty(), "tenant is already at its concurrency limit");
}

#[tokio::test]
#[serial]
async fn sequential_batch_claims_never_overlap() {
    let pool = setup_db().await;
    let store = Store::new(pool);

    for _ in 0..20 {
        store.insert_if_absent(new_job("tenant-a")).await.unwrap();
    }

    let first = store
        .claim_batch("worker-a", 10, Duration::from_secs(30), 100)
        .await
        .unwrap();
    let second = store
        .claim_batch("worker-a", 10, Duration::from_secs(30), 100)
        .await
        .unwrap();

    assert_eq!(first.len(), 10);
    assert_eq!(second.len(), 10);

    let ids: HashSet<_> = first.iter().chain(second.iter()).map(|j| j.id).collect();
    assert_eq!(ids.len(), 20, "no job should be claimed twice");
}
