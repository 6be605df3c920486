//! Instant arithmetic that cannot panic.

use std::time::{Duration, Instant};

/// `at + by`, clamped to the latest instant the platform can represent.
pub fn saturating_add(at: Instant, by: Duration) -> Instant {
    if let Some(later) = at.checked_add(by) {
        return later;
    }

    // Largest reachable offset, one halving step at a time. `reached + 2 *
    // step` never fits, so each step size is added at most once.
    let mut reached = at;
    let mut step = by / 2;
    while !step.is_zero() {
        match reached.checked_add(step) {
            Some(next) => reached = next,
            None => step /= 2,
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_range_is_plain_addition() {
        let now = Instant::now();
        assert_eq!(saturating_add(now, Duration::from_secs(5)), now + Duration::from_secs(5));
    }

    #[test]
    fn test_overflow_clamps_and_is_monotonic() {
        let now = Instant::now();
        let far = saturating_add(now, Duration::MAX);
        assert!(far > now + Duration::from_secs(3_155_760_000));
        assert_eq!(saturating_add(far, Duration::from_secs(1)), far);
        assert!(far.checked_add(Duration::from_nanos(1)).is_none());
    }
}
