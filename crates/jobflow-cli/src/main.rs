use jobflow_core::{Config, NewJob, Store, Submitter};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// A small operator tool for local development: reset a dev database, seed
/// demo jobs, print stats, print a job's attempt history, or revive a
/// dead-lettered job. Not part of the transactional core — it talks to
/// `Store`/`Submitter` through the same public API any caller would.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jobflow=info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    let config = Config::from_env()?;
    let pool = jobflow_core::db::make_pool(&config.database_url).await?;
    let store = Store::new(pool);
    let submitter = Submitter::new(store.clone(), &config);

    match command {
        "reset" => reset(&store).await?,
        "seed" => {
            let n: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(10);
            seed(&submitter, n).await?;
        }
        "stats" => stats(&submitter, args.get(2).map(String::as_str)).await?,
        "timeline" => {
            let job_id: Uuid = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: jobflowctl timeline <job_id>"))?
                .parse()?;
            timeline(&store, job_id).await?;
        }
        "revive" => {
            let job_id: Uuid = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("usage: jobflowctl revive <job_id>"))?
                .parse()?;
            let job = submitter.retry_from_dead_letter(job_id).await?;
            println!("revived {} -> queued", job.id);
        }
        _ => print_help(),
    }

    Ok(())
}

async fn reset(store: &Store) -> anyhow::Result<()> {
    sqlx::query("TRUNCATE job_attempts, jobs RESTART IDENTITY CASCADE")
        .execute(store.pool())
        .await?;
    println!("database reset");
    Ok(())
}

async fn seed(submitter: &Submitter, n: usize) -> anyhow::Result<()> {
    for i in 0..n {
        let mut new_job = NewJob::new("demo-tenant", "echo", serde_json::json!({ "i": i }));
        new_job.idempotency_key = Some(format!("seed-{i}"));
        let job = submitter.submit(new_job).await?;
        println!("seeded {}", job.id);
    }
    Ok(())
}

async fn stats(submitter: &Submitter, tenant_id: Option<&str>) -> anyhow::Result<()> {
    let counts = submitter.stats(tenant_id).await?;
    for (status, count) in counts {
        println!("{:<12} {count}", status.as_str());
    }
    Ok(())
}

async fn timeline(store: &Store, job_id: Uuid) -> anyhow::Result<()> {
    let job = store
        .get(job_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("job {job_id} not found"))?;
    println!("job {} [{}] attempts={}/{}", job.id, job.status.as_str(), job.attempts, job.max_attempts);

    for attempt in store.attempts_for_job(job_id).await? {
        println!(
            "  attempt {} by {} started {} finished {:?} outcome {:?} error {:?}",
            attempt.attempt_no, attempt.worker_id, attempt.started_at, attempt.finished_at, attempt.outcome, attempt.error_message
        );
    }
    Ok(())
}

fn print_help() {
    println!("usage: jobflowctl <reset|seed [n]|stats [tenant_id]|timeline <job_id>|revive <job_id>>");
}
