//! A small circuit breaker guarding repeated calls to a flaky collaborator
//! (the distributed lock service, the config store, or an agent).
//!
//! Same three-state `Closed -> Open -> HalfOpen` shape as a conventional
//! circuit breaker, but without const-generic configuration or
//! sliding-window failure-rate tracking — this system only needs a
//! simple consecutive-failure threshold.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Calls are allowed through.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// A limited number of probe calls are allowed through to test recovery.
    HalfOpen,
}

impl From<u8> for State {
    fn from(v: u8) -> Self {
        match v {
            0 => State::Closed,
            1 => State::Open,
            _ => State::HalfOpen,
        }
    }
}

impl From<State> for u8 {
    fn from(s: State) -> Self {
        match s {
            State::Closed => 0,
            State::Open => 1,
            State::HalfOpen => 2,
        }
    }
}

/// Configuration for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing half-open.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// A circuit breaker over calls to a single external collaborator.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// Create a new, closed circuit breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: AtomicU8::new(State::Closed.into()),
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        })
    }

    /// Current state, resolving `Open -> HalfOpen` if the reset timeout has
    /// elapsed.
    #[must_use]
    pub fn state(&self) -> State {
        let current: State = self.state.load(Ordering::Acquire).into();
        if current == State::Open {
            let opened_at = *self.opened_at.lock();
            let elapsed = opened_at.map_or(false, |t| t.elapsed() >= self.config.reset_timeout);
            if elapsed {
                self.state.store(State::HalfOpen.into(), Ordering::Release);
                return State::HalfOpen;
            }
        }
        current
    }

    /// Returns `true` if a call should be allowed through right now.
    #[must_use]
    pub fn allow(&self) -> bool {
        !matches!(self.state(), State::Open)
    }

    /// Record a successful call: closes the circuit and resets the failure
    /// counter.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.state.store(State::Closed.into(), Ordering::Release);
        *self.opened_at.lock() = None;
    }

    /// Record a failed call: opens the circuit once `failure_threshold`
    /// consecutive failures have been observed (or immediately, if the
    /// failure happened during a half-open probe).
    pub fn record_failure(&self) {
        if self.state() == State::HalfOpen {
            self.state.store(State::Open.into(), Ordering::Release);
            *self.opened_at.lock() = Some(Instant::now());
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.config.failure_threshold {
            self.state.store(State::Open.into(), Ordering::Release);
            *self.opened_at.lock() = Some(Instant::now());
        }
    }
}
