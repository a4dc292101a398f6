//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
/// capped at `max_ms`, plus up to 10% jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 || base_ms == 0 {
        return Duration::ZERO;
    }

    let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
    let capped_delay = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially() {
        let b1 = calculate_backoff(1, 100, 2000);
        assert!(b1.as_millis() >= 100 && b1.as_millis() < 110);

        let b3 = calculate_backoff(3, 100, 2000);
        assert!(b3.as_millis() >= 400 && b3.as_millis() < 440);
    }

    #[test]
    fn capped_at_max() {
        let max = calculate_backoff(60, 100, 1000);
        assert!(max.as_millis() >= 1000 && max.as_millis() < 1100);
    }

    #[test]
    fn zero_attempt_or_base_means_no_delay() {
        assert_eq!(calculate_backoff(0, 100, 1000), Duration::ZERO);
        assert_eq!(calculate_backoff(4, 0, 1000), Duration::ZERO);
    }
}
