//! Reconnect backoff.
//!
//! The nominal delay for attempt `n` (0-based) is `min(max, base * 2^n)`.
//! Each actual delay adds uniform jitter of `±jitter * nominal` and is then
//! clamped to `max` again.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

/// Delay schedule derived from [`ReconnectConfig`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    jitter: f64,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        let max = config.max_interval.max(config.min_interval);
        Self {
            base: config.min_interval,
            max,
            jitter: config.jitter.clamp(0.0, 1.0),
            max_attempts: config.max_attempts,
        }
    }

    /// Delay for `attempt` without jitter.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay for `attempt` with jitter applied.
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let offset = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        nominal.mul_f64(1.0 + offset).min(self.max)
    }

    /// Whether `attempts` failed attempts use up the budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

/// Attempt counter over a [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt. Returns `None` once the attempt
    /// budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.policy.is_exhausted(self.attempt) {
            return None;
        }
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        Some(delay)
    }

    /// Attempts scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over from the base delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter: f64, max_attempts: u32) -> ReconnectConfig {
        ReconnectConfig {
            min_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            max_attempts,
            jitter,
        }
    }

    #[test]
    fn test_nominal_delay_doubles_then_caps() {
        let policy = ReconnectPolicy::new(&config(0.0, 0));
        let delays: Vec<_> = (0..7).map(|n| policy.nominal_delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.nominal_delay(40), Duration::from_secs(30));
    }

    #[test]
    fn test_nominal_delay_is_monotone() {
        let policy = ReconnectPolicy::new(&config(0.0, 0));
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.nominal_delay(attempt);
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = ReconnectPolicy::new(&config(0.2, 0));
        for attempt in 0..8 {
            let nominal = policy.nominal_delay(attempt);
            for _ in 0..50 {
                let delay = policy.delay(attempt);
                assert!(delay >= nominal.mul_f64(0.8));
                assert!(delay <= nominal.mul_f64(1.2));
                assert!(delay <= Duration::from_secs(30));
            }
        }
    }

    #[test]
    fn test_backoff_resets_to_base() {
        let mut backoff = Backoff::new(ReconnectPolicy::new(&config(0.0, 0)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(backoff.attempts(), 3);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_backoff_budget() {
        let mut backoff = Backoff::new(ReconnectPolicy::new(&config(0.0, 3)));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 3);
    }
}
