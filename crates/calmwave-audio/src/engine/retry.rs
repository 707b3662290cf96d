use std::time::{Duration, Instant};

/// Exponential backoff for the `attempt`-th consecutive failure (1-based),
/// doubling from `base` and capped at `cap`.
pub fn backoff_delay(base: Duration, cap: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp).min(cap)
}

/// Bounded automatic retries for load failures.
///
/// Failures are consecutive until a successful load calls [`RetryPolicy::reset`].
#[derive(Debug)]
pub(crate) struct RetryPolicy {
    max_auto: u32,
    base: Duration,
    cap: Duration,
    failures: u32,
    scheduled: Option<Instant>,
}

impl RetryPolicy {
    pub fn new(max_auto: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_auto,
            base,
            cap,
            failures: 0,
            scheduled: None,
        }
    }

    /// Count a failure and schedule an automatic retry unless the ceiling is hit.
    /// Returns the delay when a retry was scheduled.
    pub fn record_failure(&mut self, now: Instant, retryable: bool) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        self.scheduled = None;
        if !retryable || self.failures >= self.max_auto {
            return None;
        }
        let delay = backoff_delay(self.base, self.cap, self.failures);
        self.scheduled = Some(now + delay);
        Some(delay)
    }

    /// Take the scheduled retry if it is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.scheduled {
            Some(at) if now >= at => {
                self.scheduled = None;
                true
            }
            _ => false,
        }
    }

    pub fn cancel(&mut self) {
        self.scheduled = None;
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.scheduled = None;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(8);
        assert_eq!(backoff_delay(base, cap, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, cap, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, cap, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, cap, 3), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, cap, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, cap, 40), Duration::from_secs(8));
    }

    #[test]
    fn stops_scheduling_at_ceiling() {
        let now = Instant::now();
        let mut policy = RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(policy.record_failure(now, true), Some(Duration::from_secs(1)));
        assert!(!policy.take_due(now));
        assert!(policy.take_due(now + Duration::from_secs(1)));
        assert_eq!(policy.record_failure(now, true), None);
        assert!(!policy.take_due(now + Duration::from_secs(60)));
        assert_eq!(policy.failures(), 2);
    }

    #[test]
    fn non_retryable_failures_never_schedule() {
        let mut policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(policy.record_failure(Instant::now(), false), None);
        assert_eq!(policy.failures(), 1);
    }

    #[test]
    fn reset_clears_count_and_schedule() {
        let now = Instant::now();
        let mut policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(8));
        policy.record_failure(now, true);
        policy.reset();
        assert_eq!(policy.failures(), 0);
        assert!(!policy.take_due(now + Duration::from_secs(60)));
    }
}
