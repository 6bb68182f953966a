//! Token-bucket rate limiter shared across workers.
//!
//! Each provider gets one limiter; every worker acquires a token before a
//! request. Tokens refill continuously at the configured requests-per-minute
//! rate with burst capacity equal to one minute's budget.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tokio::time::{Duration, Instant, sleep};

#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    pub requests_per_minute: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RequestLimiter {
    bucket: Mutex<Bucket>,
    /// Tokens per second.
    rate: f64,
    capacity: f64,
}

impl RequestLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let capacity = f64::from(config.requests_per_minute.max(1));
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate: capacity / 60.0,
            capacity,
        }
    }

    /// Wait until a request slot is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };
            sleep(wait).await;
        }
    }
}

static LIMITERS: LazyLock<Mutex<HashMap<&'static str, Arc<RequestLimiter>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// The process-wide limiter for a provider. The configuration of the first
/// caller wins; later callers share the existing bucket.
pub fn shared_limiter(provider: &'static str, config: RateLimiterConfig) -> Arc<RequestLimiter> {
    LIMITERS
        .lock()
        .entry(provider)
        .or_insert_with(|| Arc::new(RequestLimiter::new(config)))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_burst_within_capacity_is_immediate() {
        let limiter = RequestLimiter::new(RateLimiterConfig {
            requests_per_minute: 10,
        });
        let start = std::time::Instant::now();
        for _ in 0..10 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < std::time::Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_bucket_waits_for_refill() {
        let limiter = RequestLimiter::new(RateLimiterConfig {
            requests_per_minute: 60,
        });
        for _ in 0..60 {
            limiter.acquire().await;
        }
        // Bucket is empty; the next acquire needs one token = one second at
        // 60 rpm. Paused time auto-advances through the sleep.
        let before = Instant::now();
        limiter.acquire().await;
        assert!(before.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn test_shared_limiter_is_singleton() {
        let a = shared_limiter("limiter-test", RateLimiterConfig::default());
        let b = shared_limiter("limiter-test", RateLimiterConfig::default());
        assert!(Arc::ptr_eq(&a, &b));
    }
}
