//! Per-stage circuit breaker
//!
//! Closed until a run of consecutive failures hits the threshold, then open
//! for a cool-down window. After the window one trial call is let through:
//! success closes the breaker, failure re-opens it. State is behind a single
//! mutex so concurrent executions never lose counter updates.

use serde::Serialize;
use std::time::{Duration, Instant};

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Consecutive-failure circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    cooldown: Duration,
    inner: parking_lot::Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: parking_lot::Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Whether a call may proceed right now
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.can_execute_at(Instant::now())
    }

    /// Clock-injected variant of [`can_execute`](Self::can_execute)
    #[must_use]
    pub fn can_execute_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = inner
                    .last_failure
                    .is_some_and(|at| now.duration_since(at) >= self.cooldown);
                if cooled {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    true
                } else {
                    false
                }
            }
            // One trial at a time while half-open.
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    false
                } else {
                    inner.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.trial_in_flight = false;
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.last_failure = Some(Instant::now());
        inner.trial_in_flight = false;
        if inner.state == BreakerState::HalfOpen
            || inner.consecutive_failures >= self.failure_threshold
        {
            inner.state = BreakerState::Open;
        }
    }

    /// Current state without side effects
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Consecutive failures since the last success
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_secs(300))
    }

    #[test]
    fn opens_after_exactly_threshold_failures() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
            assert_eq!(breaker.state(), BreakerState::Closed);
            assert!(breaker.can_execute());
        }
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_the_failure_run() {
        let breaker = breaker();
        for _ in 0..4 {
            breaker.record_failure();
        }
        breaker.record_success();
        assert_eq!(breaker.consecutive_failures(), 0);
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn cooldown_allows_one_trial_then_closes_on_success() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        let later = Instant::now() + Duration::from_secs(301);
        assert!(breaker.can_execute_at(later));
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        // Second caller is refused while the trial is in flight.
        assert!(!breaker.can_execute_at(later));

        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.can_execute());
    }

    #[test]
    fn failed_trial_reopens() {
        let breaker = breaker();
        for _ in 0..5 {
            breaker.record_failure();
        }
        let later = Instant::now() + Duration::from_secs(301);
        assert!(breaker.can_execute_at(later));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.can_execute());
    }
}
