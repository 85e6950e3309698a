use std::time::Duration;

/// Bounded retry schedule for browser-session creation.
///
/// Pure data: the session loop asks what to wait and when to give up, and
/// does the sleeping itself, so the math is testable without a clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    budget: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration, budget: Duration) -> Self {
        Self {
            // At least one attempt always runs
            max_attempts: max_attempts.max(1),
            delay,
            budget,
        }
    }

    /// Delay to observe before the given 0-based attempt. The first attempt
    /// starts immediately.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// True once no further attempt may start: the attempt count or the
    /// wall-clock budget is spent.
    pub fn is_exhausted(&self, attempts_made: u32, elapsed: Duration) -> bool {
        attempts_made >= self.max_attempts || elapsed >= self.budget
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_has_no_delay() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(10));
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_secs(2));
        assert_eq!(policy.delay_before(7), Duration::from_secs(2));
    }

    #[test]
    fn exhausted_by_attempt_count() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(100));
        assert!(!policy.is_exhausted(2, Duration::from_secs(1)));
        assert!(policy.is_exhausted(3, Duration::from_secs(1)));
        assert!(policy.is_exhausted(4, Duration::from_secs(1)));
    }

    #[test]
    fn exhausted_by_wall_clock_budget() {
        let policy = RetryPolicy::new(100, Duration::from_secs(2), Duration::from_secs(10));
        assert!(!policy.is_exhausted(1, Duration::from_secs(9)));
        assert!(policy.is_exhausted(1, Duration::from_secs(10)));
        assert!(policy.is_exhausted(1, Duration::from_secs(11)));
    }

    #[test]
    fn zero_attempts_rounds_up_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::from_secs(1));
        assert!(!policy.is_exhausted(0, Duration::ZERO));
        assert!(policy.is_exhausted(1, Duration::ZERO));
    }
}
