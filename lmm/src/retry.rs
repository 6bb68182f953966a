//! Randomized exponential backoff for transient provider errors.

use rand::Rng;
use tokio::time::Duration;

/// Attempts per call, including the first.
pub(crate) const MAX_ATTEMPTS: u32 = 6;

const MIN_DELAY_SECS: f64 = 1.0;
const MAX_DELAY_SECS: f64 = 60.0;

/// Delay before retry number `attempt` (0-based): uniform over
/// `[min, min(2^attempt, cap)]` so concurrent workers spread out.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let ceiling = 2f64.powi(attempt as i32).clamp(MIN_DELAY_SECS, MAX_DELAY_SECS);
    let secs = rand::rng().random_range(MIN_DELAY_SECS..=ceiling.max(MIN_DELAY_SECS + f64::EPSILON));
    Duration::from_secs_f64(secs.min(MAX_DELAY_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds() {
        for attempt in 0..10 {
            for _ in 0..50 {
                let d = backoff_delay(attempt).as_secs_f64();
                assert!((1.0..=60.5).contains(&d), "attempt {attempt}: {d}");
            }
        }
    }

    #[test]
    fn test_backoff_grows_with_attempts() {
        // The ceiling doubles per attempt until the cap.
        let max_early: f64 = (0..100).map(|_| backoff_delay(0).as_secs_f64()).fold(0.0, f64::max);
        assert!(max_early <= 2.1);
    }
}
