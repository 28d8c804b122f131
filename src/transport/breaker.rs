//! Circuit breaker guarding the backend.
//!
//! ```text
//! Closed --N consecutive failures--> Open --cooldown--> HalfOpen
//!   ^                                  ^                   |
//!   +------------probe succeeds--------+--probe fails------+
//! ```
//!
//! A failed probe reopens the breaker with a doubled cooldown, capped at
//! `max_cooldown`. A successful probe closes it and restores the base
//! cooldown. The breaker is driven by the sender thread with explicit
//! instants so tests can step through time.

use std::time::{Duration, Instant};

use crate::state::BreakerStatus;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerPolicy {
    /// Consecutive retryable failures that open the breaker.
    pub failure_threshold: u32,
    pub cooldown: Duration,
    /// Ceiling for the doubling cooldown. Values past what an `Instant` can
    /// hold keep the breaker open until shutdown.
    pub max_cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown: DEFAULT_COOLDOWN,
            max_cooldown: DEFAULT_MAX_COOLDOWN,
        }
    }
}

/// Answer to "may I send now?".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permit {
    /// Closed: send normally.
    Send,
    /// HalfOpen: send exactly one probe and report its outcome.
    Probe,
    /// Open: send nothing for this long.
    Wait(Duration),
}

#[derive(Debug)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    status: BreakerStatus,
    consecutive_failures: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        let policy = BreakerPolicy {
            failure_threshold: policy.failure_threshold.max(1),
            max_cooldown: policy.max_cooldown.max(policy.cooldown),
            ..policy
        };
        Self {
            status: BreakerStatus::Closed,
            consecutive_failures: 0,
            cooldown: policy.cooldown,
            opened_at: None,
            policy,
        }
    }

    pub fn status(&self) -> BreakerStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Cooldown that applies the next time the breaker is open.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide whether a send may happen at `now`. Moves Open to HalfOpen once
    /// the cooldown has elapsed.
    pub fn permit(&mut self, now: Instant) -> Permit {
        match self.status {
            BreakerStatus::Closed => Permit::Send,
            BreakerStatus::HalfOpen => Permit::Probe,
            BreakerStatus::Open => {
                let opened = self.opened_at.unwrap_or(now);
                match opened.checked_add(self.cooldown) {
                    Some(reopens) if now >= reopens => {
                        self.status = BreakerStatus::HalfOpen;
                        Permit::Probe
                    }
                    Some(reopens) => Permit::Wait(reopens - now),
                    None => Permit::Wait(self.cooldown),
                }
            }
        }
    }

    /// The backend answered. Permanent failures also land here: they prove
    /// the backend is reachable.
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
        if self.status != BreakerStatus::Closed {
            self.status = BreakerStatus::Closed;
            self.cooldown = self.policy.cooldown;
            self.opened_at = None;
        }
    }

    /// A retryable failure happened at `now`.
    pub fn on_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.status {
            BreakerStatus::Closed => {
                if self.consecutive_failures >= self.policy.failure_threshold {
                    self.open(now);
                }
            }
            BreakerStatus::HalfOpen => {
                self.cooldown = self
                    .cooldown
                    .saturating_mul(2)
                    .min(self.policy.max_cooldown);
                self.open(now);
            }
            BreakerStatus::Open => self.opened_at = Some(now),
        }
    }

    fn open(&mut self, now: Instant) {
        self.status = BreakerStatus::Open;
        self.opened_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerPolicy {
            failure_threshold: 3,
            cooldown: Duration::from_secs(1),
            max_cooldown: Duration::from_secs(3),
        })
    }

    #[rstest]
    fn opens_after_exactly_threshold_failures(mut breaker: CircuitBreaker) {
        let t0 = Instant::now();
        breaker.on_failure(t0);
        breaker.on_failure(t0);
        assert_eq!(breaker.status(), BreakerStatus::Closed);
        assert_eq!(breaker.permit(t0), Permit::Send);
        breaker.on_failure(t0);
        assert_eq!(breaker.status(), BreakerStatus::Open);
        assert_eq!(breaker.consecutive_failures(), 3);
    }

    #[test]
    fn unrepresentable_cooldown_keeps_the_breaker_open() {
        let mut breaker = CircuitBreaker::new(BreakerPolicy {
            failure_threshold: 1,
            cooldown: Duration::MAX,
            max_cooldown: Duration::MAX,
        });
        let t0 = Instant::now();
        breaker.on_failure(t0);
        assert_eq!(
            breaker.permit(t0 + Duration::from_secs(3600)),
            Permit::Wait(Duration::MAX)
        );
        assert_eq!(breaker.status(), BreakerStatus::Open);
    }

    #[rstest]
    fn open_breaker_withholds_traffic_until_cooldown(mut breaker: CircuitBreaker) {
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.on_failure(t0);
        }
        assert_eq!(
            breaker.permit(t0 + Duration::from_millis(400)),
            Permit::Wait(Duration::from_millis(600))
        );
        assert_eq!(breaker.permit(t0 + Duration::from_secs(1)), Permit::Probe);
        assert_eq!(breaker.status(), BreakerStatus::HalfOpen);
    }

    #[rstest]
    fn failed_probe_doubles_cooldown_up_to_cap(mut breaker: CircuitBreaker) {
        let mut now = Instant::now();
        for _ in 0..3 {
            breaker.on_failure(now);
        }
        let mut seen = Vec::new();
        for _ in 0..3 {
            now += breaker.cooldown();
            assert_eq!(breaker.permit(now), Permit::Probe);
            breaker.on_failure(now);
            assert_eq!(breaker.status(), BreakerStatus::Open);
            seen.push(breaker.cooldown());
        }
        assert_eq!(
            seen,
            [2, 3, 3].map(Duration::from_secs).to_vec()
        );
    }

    #[rstest]
    fn successful_probe_closes_and_resets(mut breaker: CircuitBreaker) {
        let t0 = Instant::now();
        for _ in 0..3 {
            breaker.on_failure(t0);
        }
        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(breaker.permit(t1), Permit::Probe);
        breaker.on_failure(t1);
        let t2 = t1 + Duration::from_secs(2);
        assert_eq!(breaker.permit(t2), Permit::Probe);
        breaker.on_success();
        assert_eq!(breaker.status(), BreakerStatus::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
        assert_eq!(breaker.cooldown(), Duration::from_secs(1));
    }

    #[rstest]
    fn success_resets_the_failure_streak(mut breaker: CircuitBreaker) {
        let t0 = Instant::now();
        breaker.on_failure(t0);
        breaker.on_failure(t0);
        breaker.on_success();
        breaker.on_failure(t0);
        breaker.on_failure(t0);
        assert_eq!(breaker.status(), BreakerStatus::Closed);
    }

    #[test]
    fn zero_threshold_is_treated_as_one() {
        let mut breaker = CircuitBreaker::new(BreakerPolicy {
            failure_threshold: 0,
            ..BreakerPolicy::default()
        });
        breaker.on_failure(Instant::now());
        assert_eq!(breaker.status(), BreakerStatus::Open);
    }
}
