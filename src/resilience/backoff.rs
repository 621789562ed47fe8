//! Backoff delay calculation.

use rand::Rng;
use std::time::Duration;

/// Delay to wait after failed attempt number `attempt` (1-based).
///
/// Fixed `base` unless `exponential`, in which case `base * 2^(attempt-1)`.
/// Saturates instead of overflowing, then applies the optional cap.
pub fn calculate_backoff(
    attempt: u32,
    base: Duration,
    exponential: bool,
    max: Option<Duration>,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let delay = if exponential {
        let factor = 2u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        base.saturating_mul(factor)
    } else {
        base
    };

    match max {
        Some(cap) => delay.min(cap),
        None => delay,
    }
}

/// Add 0 to 10% of random jitter on top of `delay`. Never shortens it.
pub fn with_jitter(delay: Duration) -> Duration {
    let jitter_range = delay.as_millis() as u64 / 10;
    if jitter_range == 0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(0..jitter_range);
    delay.saturating_add(Duration::from_millis(jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_millis(10);

    #[test]
    fn test_fixed_backoff() {
        assert_eq!(calculate_backoff(1, BASE, false, None), BASE);
        assert_eq!(calculate_backoff(5, BASE, false, None), BASE);
    }

    #[test]
    fn test_exponential_backoff() {
        assert_eq!(calculate_backoff(1, BASE, true, None), Duration::from_millis(10));
        assert_eq!(calculate_backoff(2, BASE, true, None), Duration::from_millis(20));
        assert_eq!(calculate_backoff(3, BASE, true, None), Duration::from_millis(40));
    }

    #[test]
    fn test_cap_and_saturation() {
        let cap = Some(Duration::from_millis(100));
        assert_eq!(calculate_backoff(10, BASE, true, cap), Duration::from_millis(100));

        let huge = calculate_backoff(200, Duration::from_secs(u64::MAX / 2), true, None);
        assert_eq!(huge, Duration::MAX);
    }

    #[test]
    fn test_jitter_only_adds() {
        let delay = Duration::from_millis(1000);
        for _ in 0..50 {
            let jittered = with_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered < delay + Duration::from_millis(100));
        }
        assert_eq!(with_jitter(Duration::from_millis(5)), Duration::from_millis(5));
    }
}
