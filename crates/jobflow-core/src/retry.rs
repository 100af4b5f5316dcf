use rand::Rng;

/// `base` and `cap` bound the exponential backoff; both are in seconds.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub base_seconds: i64,
    pub cap_seconds: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_seconds: 5,
            cap_seconds: 600,
        }
    }
}

/// `backoff(attempt, policy) = min(cap, base * 2^(attempt-1)) * (1 + jitter)`,
/// `jitter` drawn uniformly from `[0, 0.1]`. `attempt` is 1-based: the delay
/// before the *next* attempt after `attempt` has failed.
pub fn backoff_seconds(attempt: i32, policy: RetryPolicy, rng: &mut impl Rng) -> f64 {
    let exponent = (attempt - 1).max(0);
    let unjittered = match 2i64.checked_pow(exponent.min(62) as u32) {
        Some(factor) => (policy.base_seconds.saturating_mul(factor)).min(policy.cap_seconds),
        None => policy.cap_seconds,
    };
    let jitter: f64 = rng.gen_range(0.0..=0.1);
    unjittered as f64 * (1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn grows_exponentially_until_capped() {
        let policy = RetryPolicy { base_seconds: 5, cap_seconds: 600 };
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);

        let d1 = backoff_seconds(1, policy, &mut rng);
        let d2 = backoff_seconds(2, policy, &mut rng);
        let d3 = backoff_seconds(3, policy, &mut rng);

        assert!(d1 >= 5.0 && d1 <= 5.5);
        assert!(d2 >= 10.0 && d2 <= 11.0);
        assert!(d3 >= 20.0 && d3 <= 22.0);
        assert!(d2 > d1);
        assert!(d3 > d2);
    }

    #[test]
    fn never_exceeds_cap_times_jitter() {
        let policy = RetryPolicy { base_seconds: 5, cap_seconds: 600 };
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for attempt in 1..40 {
            let d = backoff_seconds(attempt, policy, &mut rng);
            assert!(d <= policy.cap_seconds as f64 * 1.1 + 1e-6);
        }
    }

    #[test]
    fn jitter_only_ever_adds() {
        let policy = RetryPolicy { base_seconds: 5, cap_seconds: 600 };
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let d = backoff_seconds(1, policy, &mut rng);
        assert!(d >= 5.0);
    }
}
