//! Circuit breaker for provider failure containment.
//!
//! Closed is the healthy state. After a run of consecutive transient failures
//! the breaker opens and every call fails immediately with the remaining
//! cooldown. Once the cooldown elapses the breaker admits a bounded number of
//! probe calls in half-open; enough consecutive successes close it again, any
//! failure reopens it. Only transient remote errors move the breaker.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::LmmError;

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive transient failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub cooldown: Duration,
    /// Calls admitted while half-open.
    pub half_open_max_calls: u32,
    /// Consecutive successes in half-open that close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            cooldown: Duration::from_secs(60),
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    opened_at: Option<Instant>,
}

pub struct CircuitBreaker {
    provider: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(provider: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            provider,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                opened_at: None,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Gate a call. Fails with [`LmmError::CircuitOpen`] while the circuit is
    /// open or the half-open probe budget is exhausted.
    pub fn check(&self) -> Result<(), LmmError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let remaining = inner
                    .opened_at
                    .map(|at| {
                        self.config
                            .cooldown
                            .saturating_sub(now.duration_since(at))
                            .as_secs_f64()
                    })
                    .unwrap_or(0.0);
                Err(LmmError::CircuitOpen {
                    provider: self.provider,
                    cooldown_remaining: remaining,
                })
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls >= self.config.half_open_max_calls {
                    return Err(LmmError::CircuitOpen {
                        provider: self.provider,
                        cooldown_remaining: 0.0,
                    });
                }
                inner.half_open_calls += 1;
                Ok(())
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!(provider = self.provider, "circuit breaker closed");
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.half_open_calls = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!(
                    provider = self.provider,
                    "failure while half-open, reopening circuit"
                );
                self.open(&mut inner);
            }
            CircuitState::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        provider = self.provider,
                        failures = inner.failure_count,
                        "circuit breaker opened"
                    );
                    self.open(&mut inner);
                }
            }
            CircuitState::Open => {}
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.half_open_calls = 0;
        inner.opened_at = None;
    }

    fn open(&self, inner: &mut Inner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(Instant::now());
        inner.success_count = 0;
        inner.half_open_calls = 0;
    }

    fn refresh(&self, inner: &mut Inner, now: Instant) {
        if inner.state == CircuitState::Open
            && let Some(at) = inner.opened_at
            && now.duration_since(at) >= self.config.cooldown
        {
            tracing::info!(provider = self.provider, "circuit breaker half-open");
            inner.state = CircuitState::HalfOpen;
            inner.half_open_calls = 0;
            inner.success_count = 0;
        }
    }
}

static BREAKERS: LazyLock<Mutex<HashMap<&'static str, Arc<CircuitBreaker>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// The process-wide breaker for a provider, constructed lazily with defaults
/// and shared by every worker.
pub fn shared_breaker(provider: &'static str) -> Arc<CircuitBreaker> {
    BREAKERS
        .lock()
        .entry(provider)
        .or_insert_with(|| {
            Arc::new(CircuitBreaker::new(
                provider,
                CircuitBreakerConfig::default(),
            ))
        })
        .clone()
}
