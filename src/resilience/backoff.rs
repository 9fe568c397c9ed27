//! # Backoff Helpers
//!
//! Linear-capped restart delays and jitter for retry loops.

use rand::Rng;
use std::time::Duration;

/// Delay before restart attempt `attempt` (1-based): `min(attempt * base, cap)`
pub fn restart_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    base.saturating_mul(attempt.max(1)).min(cap)
}

/// Add up to `max_jitter` of random delay to `delay`
pub fn with_jitter(delay: Duration, max_jitter: Duration) -> Duration {
    if max_jitter.is_zero() {
        return delay;
    }
    let jitter_ms = rand::thread_rng().gen_range(0..=max_jitter.as_millis() as u64);
    delay + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_delay_grows_then_caps() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(2);
        assert_eq!(restart_delay(1, base, cap), Duration::from_millis(500));
        assert_eq!(restart_delay(3, base, cap), Duration::from_millis(1500));
        assert_eq!(restart_delay(4, base, cap), cap);
        assert_eq!(restart_delay(100, base, cap), cap);
    }

    #[test]
    fn test_attempt_zero_treated_as_first() {
        let base = Duration::from_millis(250);
        assert_eq!(restart_delay(0, base, Duration::from_secs(1)), base);
    }

    #[test]
    fn test_jitter_bounds() {
        let delay = Duration::from_millis(100);
        assert_eq!(with_jitter(delay, Duration::ZERO), delay);
        for _ in 0..50 {
            let jittered = with_jitter(delay, Duration::from_millis(20));
            assert!(jittered >= delay);
            assert!(jittered <= delay + Duration::from_millis(20));
        }
    }
}
