use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff for outbound calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound applied to server-supplied `Retry-After` hints.
    pub max_retry_after_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 4_000,
            max_retry_after_ms: 10_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(self, max_retries: u32) -> Self {
        Self { max_retries, ..self }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// A server hint wins over computed backoff, capped at `max_retry_after_ms`.
    /// Jitter scales the computed backoff into `[backoff / 2, backoff]`.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(Duration::from_millis(self.max_retry_after_ms));
        }

        let backoff = self.backoff(attempt);
        if !self.jitter || backoff.is_zero() {
            return backoff;
        }
        backoff.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
    }

    /// Longest total sleep the policy can produce across all retries.
    pub fn worst_case_delay(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| self.backoff(attempt).max(Duration::from_millis(self.max_retry_after_ms)))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;

    fn policy() -> RetryPolicy {
        RetryPolicy { jitter: false, ..RetryPolicy::default() }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(1), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4_000));
        assert_eq!(policy.backoff(12), Duration::from_millis(4_000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(4_000));
    }

    #[test]
    fn retry_after_hint_overrides_backoff_up_to_cap() {
        let policy = policy();
        assert_eq!(policy.delay_for(0, Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(policy.delay_for(0, Some(Duration::from_secs(120))), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_half_to_full_backoff() {
        let policy = RetryPolicy { jitter: true, ..RetryPolicy::default() };
        for _ in 0..50 {
            let delay = policy.delay_for(2, None);
            assert!(delay >= Duration::from_millis(1_000), "{delay:?}");
            assert!(delay <= Duration::from_millis(2_000), "{delay:?}");
        }
    }

    #[test]
    fn attempts_and_worst_case() {
        let policy = policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.worst_case_delay(), Duration::from_secs(20));
        assert_eq!(policy.clone().with_max_retries(0).worst_case_delay(), Duration::ZERO);
    }
}
