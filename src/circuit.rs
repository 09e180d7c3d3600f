//! Circuit breaker for upstream dispatch.
//!
//! Sliding-window failure-rate trip with half-open recovery, kept from the
//! gateway's original breaker but switched from a time-reset window to a
//! fixed-size request-count window (the last N outcomes), matching the
//! count-based `window` the rate limiter and fallback scheduler also use.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Circuit breaker errors.
#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    /// Circuit is open, requests are rejected.
    #[error("circuit breaker is open")]
    Open,
    /// Too many requests in half-open state.
    #[error("too many requests in half-open state")]
    HalfOpenLimitExceeded,
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerState {
    /// Requests flow normally.
    Closed,
    /// Requests are rejected.
    Open,
    /// Testing whether the upstream has recovered.
    HalfOpen,
}

impl CircuitBreakerState {
    /// String form used in metrics labels.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaking for upstream dispatch.
    pub enabled: bool,
    /// Number of most recent outcomes considered for the failure rate.
    pub window: usize,
    /// Failure-rate percentage (0-100) at which the circuit trips.
    pub failure_threshold: f64,
    /// How long the circuit stays open before probing half-open.
    #[serde(with = "humantime_serde")]
    pub open_wait: Duration,
    /// Requests allowed through while half-open.
    pub half_open_max_requests: u32,
    /// Per-call timeout applied to the upstream dispatch itself.
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: 20,
            failure_threshold: 50.0,
            open_wait: Duration::from_secs(5),
            half_open_max_requests: 5,
            call_timeout: Duration::from_secs(5),
        }
    }
}

struct Outcomes {
    window: usize,
    recent: VecDeque<bool>,
    failures: u32,
}

impl Outcomes {
    fn new(window: usize) -> Self {
        Self {
            window,
            recent: VecDeque::with_capacity(window),
            failures: 0,
        }
    }

    fn record(&mut self, success: bool) {
        if self.recent.len() == self.window {
            if let Some(evicted) = self.recent.pop_front() {
                if !evicted {
                    self.failures -= 1;
                }
            }
        }
        self.recent.push_back(success);
        if !success {
            self.failures += 1;
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        (self.failures as f64 / self.recent.len() as f64) * 100.0
    }

    fn is_full(&self) -> bool {
        self.recent.len() >= self.window
    }

    fn clear(&mut self) {
        self.recent.clear();
        self.failures = 0;
    }
}

struct InternalState {
    state: CircuitBreakerState,
    outcomes: Outcomes,
    opened_at: Option<Instant>,
    half_open_requests: u32,
}

/// Per-route (or per-upstream) circuit breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<RwLock<InternalState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let window = config.window;
        Self {
            config,
            state: Arc::new(RwLock::new(InternalState {
                state: CircuitBreakerState::Closed,
                outcomes: Outcomes::new(window),
                opened_at: None,
                half_open_requests: 0,
            })),
        }
    }

    /// Check whether a request may proceed, mutating internal state for the
    /// half-open / open-to-half-open transitions.
    pub fn allow_request(&self) -> Result<(), CircuitBreakerError> {
        let mut state = self.state.write();

        match state.state {
            CircuitBreakerState::Closed => Ok(()),
            CircuitBreakerState::Open => {
                let opened_at = state.opened_at.expect("open state always has opened_at");
                if opened_at.elapsed() >= self.config.open_wait {
                    state.state = CircuitBreakerState::HalfOpen;
                    state.half_open_requests = 0;
                    state.outcomes.clear();
                    Ok(())
                } else {
                    Err(CircuitBreakerError::Open)
                }
            }
            CircuitBreakerState::HalfOpen => {
                if state.half_open_requests < self.config.half_open_max_requests {
                    state.half_open_requests += 1;
                    Ok(())
                } else {
                    Err(CircuitBreakerError::HalfOpenLimitExceeded)
                }
            }
        }
    }

    /// Record a successful upstream call.
    pub fn record_success(&self) {
        let mut state = self.state.write();

        match state.state {
            CircuitBreakerState::Closed => {
                state.outcomes.record(true);
            }
            CircuitBreakerState::HalfOpen => {
                state.outcomes.record(true);
                if state.half_open_requests >= self.config.half_open_max_requests {
                    state.state = CircuitBreakerState::Closed;
                    state.outcomes.clear();
                }
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Record a failed upstream call.
    pub fn record_failure(&self) {
        let mut state = self.state.write();

        match state.state {
            CircuitBreakerState::Closed => {
                state.outcomes.record(false);
                if self.should_trip(&state.outcomes) {
                    state.state = CircuitBreakerState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitBreakerState::HalfOpen => {
                state.state = CircuitBreakerState::Open;
                state.opened_at = Some(Instant::now());
                state.outcomes.clear();
            }
            CircuitBreakerState::Open => {}
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitBreakerState {
        self.state.read().state
    }

    /// Per-call timeout to apply when dispatching through this breaker.
    pub fn call_timeout(&self) -> Duration {
        self.config.call_timeout
    }

    /// Manually reset to closed.
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.state = CircuitBreakerState::Closed;
        state.outcomes.clear();
        state.opened_at = None;
        state.half_open_requests = 0;
    }

    fn should_trip(&self, outcomes: &Outcomes) -> bool {
        outcomes.is_full() && outcomes.failure_rate() >= self.config.failure_threshold
    }
}

impl Clone for CircuitBreaker {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            window: 5,
            failure_threshold: 50.0,
            open_wait: Duration::from_millis(100),
            half_open_max_requests: 3,
            call_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn starts_closed() {
        let breaker = CircuitBreaker::new(test_config());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
        assert!(breaker.allow_request().is_ok());
    }

    #[test]
    fn trips_once_window_is_full_and_over_threshold() {
        let breaker = CircuitBreaker::new(test_config());

        for _ in 0..2 {
            breaker.allow_request().unwrap();
            breaker.record_failure();
        }
        for _ in 0..2 {
            breaker.allow_request().unwrap();
            breaker.record_success();
        }
        // 4/5 window entries so far, 2 failures: not full yet.
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        breaker.allow_request().unwrap();
        breaker.record_failure();
        // window full at 5, 3 failures = 60% >= 50%
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(breaker.allow_request().is_err());
    }

    #[test]
    fn half_open_recovers_to_closed_on_success() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..5 {
            breaker.allow_request().unwrap();
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Open);

        std::thread::sleep(Duration::from_millis(150));
        assert!(breaker.allow_request().is_ok());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);

        for _ in 0..3 {
            breaker.allow_request().ok();
            breaker.record_success();
        }
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(test_config());
        for _ in 0..5 {
            breaker.allow_request().unwrap();
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(150));
        breaker.allow_request().unwrap();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
    }
}
