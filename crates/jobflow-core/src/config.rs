use std::time::Duration;

/// Central, typed runtime configuration. Loaded once from the environment
/// at process startup; every field has a default so a bare `DATABASE_URL`
/// is enough to run a worker.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub lease_seconds: i64,
    pub heartbeat_fraction: f64,
    pub worker_batch_size: i64,
    pub worker_max_in_flight: usize,
    pub poll_interval_min_ms: u64,
    pub poll_interval_max_ms: u64,
    pub tenant_concurrency_limit: i64,
    pub retry_base_seconds: i64,
    pub retry_cap_seconds: i64,
    pub reaper_interval_seconds: u64,
    pub reaper_batch: i64,
    pub grace_period_seconds: u64,
    pub rate_limit_per_minute: f64,
    pub rate_burst_multiplier: f64,
    pub max_payload_bytes: usize,
    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_str("JOBFLOW_WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

        let lease_seconds = env_parse("JOBFLOW_LEASE_SECONDS").unwrap_or(30);
        let heartbeat_fraction = env_parse("JOBFLOW_HEARTBEAT_FRACTION").unwrap_or(0.5);
        let worker_batch_size = env_parse("JOBFLOW_BATCH_SIZE").unwrap_or(10);
        let worker_max_in_flight = env_parse("JOBFLOW_MAX_IN_FLIGHT").unwrap_or(10);
        let poll_interval_min_ms = env_parse("JOBFLOW_POLL_INTERVAL_MIN_MS").unwrap_or(200);
        let poll_interval_max_ms = env_parse("JOBFLOW_POLL_INTERVAL_MAX_MS").unwrap_or(2000);
        let tenant_concurrency_limit = env_parse("JOBFLOW_TENANT_CONCURRENCY_LIMIT").unwrap_or(10);
        let retry_base_seconds = env_parse("JOBFLOW_RETRY_BASE_SECONDS").unwrap_or(5);
        let retry_cap_seconds = env_parse("JOBFLOW_RETRY_CAP_SECONDS").unwrap_or(600);
        let reaper_interval_seconds = env_parse("JOBFLOW_REAPER_INTERVAL_SECONDS").unwrap_or(30);
        let reaper_batch = env_parse("JOBFLOW_REAPER_BATCH").unwrap_or(100);
        let grace_period_seconds = env_parse("JOBFLOW_GRACE_PERIOD_SECONDS").unwrap_or(60);
        let rate_limit_per_minute = env_parse("JOBFLOW_RATE_LIMIT_PER_MINUTE").unwrap_or(600.0);
        let rate_burst_multiplier = env_parse("JOBFLOW_RATE_BURST_MULTIPLIER").unwrap_or(2.0);
        let max_payload_bytes = env_parse("JOBFLOW_MAX_PAYLOAD_BYTES").unwrap_or(256 * 1024);
        let migrate_on_startup = env_bool("JOBFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        Ok(Self {
            database_url,
            worker_id,
            lease_seconds,
            heartbeat_fraction,
            worker_batch_size,
            worker_max_in_flight,
            poll_interval_min_ms,
            poll_interval_max_ms,
            tenant_concurrency_limit,
            retry_base_seconds,
            retry_cap_seconds,
            reaper_interval_seconds,
            reaper_batch,
            grace_period_seconds,
            rate_limit_per_minute,
            rate_burst_multiplier,
            max_payload_bytes,
            migrate_on_startup,
        })
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_seconds.max(1) as u64)
    }

    pub fn poll_interval_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.poll_interval_min_ms),
            Duration::from_millis(self.poll_interval_max_ms),
        )
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_str(key).and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
