//! Exponential backoff between optimistic commit attempts

use std::time::Duration;

/// Generates the waits between commit retries.
///
/// Waits grow by a fixed multiplier from the configured minimum, capped at the
/// maximum, until the total budget is spent. `next_delay` returns `None` once
/// sleeping again would exceed the budget.
#[derive(Debug)]
pub(crate) struct ExponentialBackoff {
    min_wait: Duration,
    max_wait: Duration,
    total_budget: Duration,
    multiplier: f64,
    attempt: u32,
    slept: Duration,
}

impl ExponentialBackoff {
    pub(crate) fn new(min_wait: Duration, max_wait: Duration, total_budget: Duration) -> Self {
        Self {
            min_wait,
            max_wait,
            total_budget,
            multiplier: 2.0,
            attempt: 0,
            slept: Duration::ZERO,
        }
    }

    /// The wait before the next retry, or `None` when the budget is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        let exponential =
            self.min_wait.as_millis() as f64 * self.multiplier.powi(self.attempt as i32);
        let capped = exponential.min(self.max_wait.as_millis() as f64);
        let wait = Duration::from_millis(capped as u64);

        if self.slept + wait > self.total_budget {
            return None;
        }
        self.attempt += 1;
        self.slept += wait;
        Some(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delays_double_up_to_the_cap() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(35),
            Duration::from_secs(10),
        );
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(10)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(20)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(35)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(35)));
    }

    #[test]
    fn test_total_budget_bounds_the_sum_of_delays() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(80),
            Duration::from_millis(100),
        );
        let mut total = Duration::ZERO;
        while let Some(delay) = backoff.next_delay() {
            total += delay;
        }
        assert!(total <= Duration::from_millis(100));
        // 10 + 20 + 40 fits, the next delay of 80 does not
        assert_eq!(total, Duration::from_millis(70));
    }

    #[test]
    fn test_zero_budget_allows_no_sleep() {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(80),
            Duration::ZERO,
        );
        assert_eq!(backoff.next_delay(), None);
    }
}
