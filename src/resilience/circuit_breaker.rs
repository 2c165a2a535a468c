use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The state of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Requests flow to the primary normally
    Closed,
    /// The primary is considered down; requests are not sent
    Open,
    /// Probing: a limited number of requests test recovery
    HalfOpen,
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing again
    pub reset_timeout: Duration,
    /// Consecutive successes in half-open state needed to close
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Circuit breaker over the primary store. All transitions happen under one
/// short-lived mutex; no operation holds it across I/O.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
            config,
        }
    }

    /// Whether an operation may be sent to the primary right now.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed());
                if elapsed.map_or(false, |e| e > self.config.reset_timeout) {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_successes = 0;
                    debug!("circuit breaker half-open, probing primary store");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.opened_at = None;
                    debug!("circuit breaker closed after successful probes");
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                // Any failure while probing reopens the circuit
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
                warn!("circuit breaker re-opened after failed probe");
            }
            BreakerState::Open => {}
        }
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().unwrap().state
    }
}
