//! Jittered exponential backoff for retrying a batch.

use std::time::Duration;

use rand::{Rng, SeedableRng, rngs::StdRng};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(100);
pub const DEFAULT_RETRY_CAP: Duration = Duration::from_secs(10);

/// How often and how patiently a batch is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; zero disables retrying.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base: DEFAULT_RETRY_BASE,
            cap: DEFAULT_RETRY_CAP,
        }
    }
}

/// Tracks retries of one batch and produces jittered delays.
///
/// The ceiling doubles on each retry, starting at `base` and never exceeding
/// `cap`. The delay is drawn uniformly from the upper half of the ceiling.
pub struct Backoff {
    policy: RetryPolicy,
    attempt: u32,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic jitter, for tests.
    pub fn with_seed(policy: RetryPolicy, seed: u64) -> Self {
        Self {
            policy,
            attempt: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Retries handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over for a new batch.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next retry, or `None` once the budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_retries {
            return None;
        }
        let ceiling = self
            .policy
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.policy.cap);
        self.attempt += 1;

        let max_ms = ceiling.as_millis().min(u128::from(u64::MAX)) as u64;
        let delay_ms = match max_ms {
            0 | 1 => max_ms,
            _ => self.rng.gen_range(max_ms / 2..=max_ms),
        };
        Some(Duration::from_millis(delay_ms))
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff")
            .field("policy", &self.policy)
            .field("attempt", &self.attempt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base: Duration::from_millis(100),
            cap: Duration::from_millis(350),
        }
    }

    #[test]
    fn delays_grow_within_the_cap() {
        let mut backoff = Backoff::with_seed(policy(4), 7);
        let delays: Vec<Duration> = std::iter::from_fn(|| backoff.next_delay()).collect();
        assert_eq!(delays.len(), 4);
        let ceilings = [100, 200, 350, 350];
        for (delay, ceiling) in delays.iter().zip(ceilings) {
            let ms = delay.as_millis() as u64;
            assert!(
                (ceiling / 2..=ceiling).contains(&ms),
                "{ms}ms outside [{}, {ceiling}]",
                ceiling / 2
            );
        }
    }

    #[test]
    fn budget_is_exhausted_then_reset() {
        let mut backoff = Backoff::with_seed(policy(2), 1);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        assert_eq!(backoff.attempts(), 2);
        backoff.reset();
        assert!(backoff.next_delay().is_some());
    }

    #[test]
    fn zero_retries_never_retries() {
        let mut backoff = Backoff::new(policy(0));
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn same_seed_same_delays() {
        let mut a = Backoff::with_seed(policy(3), 99);
        let mut b = Backoff::with_seed(policy(3), 99);
        for _ in 0..3 {
            assert_eq!(a.next_delay(), b.next_delay());
        }
    }
}
