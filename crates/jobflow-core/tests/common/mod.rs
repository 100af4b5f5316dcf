use jobflow_core::{NewJob, Priority};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn setup_db() -> PgPool {
    dotenvy::dotenv().ok();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run the jobflow-core integration tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    sqlx::query("TRUNCATE job_attempts, jobs RESTART IDENTITY CASCADE")
        .execute(&pool)
        .await
        .expect("failed to truncate tables between tests");

    pool
}

pub fn new_job(tenant_id: &str) -> NewJob {
    NewJob::new(tenant_id, "echo", serde_json::json!({ "hello": "world" }))
}

pub fn new_job_with_priority(tenant_id: &str, priority: Priority) -> NewJob {
    let mut job = new_job(tenant_id);
    job.priority = priority;
    job
}
