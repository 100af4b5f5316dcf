use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Instant;

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-tenant token bucket, held entirely in process memory. `DashMap`
/// shards its internal locking across tenants, so acquiring a token for one
/// tenant never blocks another's. Acceptable per the queue's concurrency
/// model: the limiter does not need to be distributed, only fair within a
/// single process.
pub struct RateLimiter {
    buckets: DashMap<String, Mutex<TokenBucket>>,
    rate_per_minute: f64,
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate_per_minute: f64, burst_multiplier: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            rate_per_minute,
            capacity: (rate_per_minute / 60.0 * burst_multiplier).max(1.0),
        }
    }

    fn refill_rate_per_sec(&self) -> f64 {
        self.rate_per_minute / 60.0
    }

    /// Attempts to take one token for `tenant_id`. Returns `true` if the
    /// submission is admitted.
    pub fn try_acquire(&self, tenant_id: &str) -> bool {
        let entry = self.buckets.entry(tenant_id.to_string()).or_insert_with(|| {
            Mutex::new(TokenBucket {
                tokens: self.capacity,
                last_refill: Instant::now(),
            })
        });

        let mut bucket = entry.lock().expect("rate limiter bucket lock poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate_per_sec()).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Milliseconds until at least one token will be available for
    /// `tenant_id`, assuming no further acquisitions happen meanwhile.
    pub fn retry_after_ms(&self, tenant_id: &str) -> u64 {
        let Some(entry) = self.buckets.get(tenant_id) else {
            return 0;
        };
        let bucket = entry.lock().expect("rate limiter bucket lock poisoned");
        if bucket.tokens >= 1.0 {
            return 0;
        }
        let deficit = 1.0 - bucket.tokens;
        let seconds = deficit / self.refill_rate_per_sec();
        (seconds * 1000.0).ceil().max(0.0) as u64
    }
}
