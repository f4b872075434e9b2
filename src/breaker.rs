//! Circuit breaker with a count-based sliding window.
//!
//! The breaker gates every pipeline invocation. While `Closed` it records
//! each outcome in a fixed-size window of the most recent calls and trips
//! to `Open` once the window is full and the observed failure rate reaches
//! the threshold. While `Open` it rejects calls outright until `open_wait`
//! elapses, then admits a bounded number of `HalfOpen` probe calls. Every
//! probe must succeed for the breaker to close again; a single probe
//! failure reopens it and restarts the wait.
//!
//! One outcome is recorded per invocation regardless of how many attempts
//! the retry policy made underneath, and a deadline failure counts the same
//! as any other failure.
//!
//! Window append, threshold check, and state transition happen under one
//! lock acquisition, so concurrent calls cannot each observe a
//! sub-threshold rate and both skip the transition. A call that is
//! mid-flight when a transition commits completes under the regime that
//! admitted it; its late outcome is discarded rather than applied
//! retroactively.

use crate::clock::{Clock, MonotonicClock};
use crate::metrics::MetricsRegistry;
use crate::PipelineError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls permitted; outcomes recorded in the sliding window.
    Closed,
    /// Calls rejected without execution until the wait elapses.
    Open,
    /// A bounded number of probe calls permitted to test recovery.
    HalfOpen,
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitBreakerError {
    /// The sliding window must hold at least one call.
    #[error("window_size must be > 0 (got {0})")]
    InvalidWindowSize(usize),
    /// The failure rate is a percentage in `(0, 100]`.
    #[error("failure_rate_threshold must be a percentage in (0, 100] (got {0})")]
    InvalidFailureRateThreshold(f32),
    /// The breaker must stay open for a positive duration.
    #[error("open_wait must be > 0 (got {0:?})")]
    InvalidOpenWait(Duration),
    /// At least one probe call must be permitted while half-open.
    #[error("half_open_permitted_calls must be > 0 (got {0})")]
    InvalidHalfOpenPermits(usize),
}

/// Validated breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    window_size: usize,
    failure_rate_threshold: f32,
    open_wait: Duration,
    half_open_permitted_calls: usize,
}

impl CircuitBreakerConfig {
    /// Create a config, validating every field.
    ///
    /// `failure_rate_threshold` is a percentage: `50.0` trips the breaker
    /// once half the calls in a full window have failed.
    pub fn new(
        window_size: usize,
        failure_rate_threshold: f32,
        open_wait: Duration,
        half_open_permitted_calls: usize,
    ) -> Result<Self, CircuitBreakerError> {
        if window_size == 0 {
            return Err(CircuitBreakerError::InvalidWindowSize(window_size));
        }
        if !(failure_rate_threshold > 0.0 && failure_rate_threshold <= 100.0) {
            return Err(CircuitBreakerError::InvalidFailureRateThreshold(failure_rate_threshold));
        }
        if open_wait == Duration::ZERO {
            return Err(CircuitBreakerError::InvalidOpenWait(open_wait));
        }
        if half_open_permitted_calls == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenPermits(half_open_permitted_calls));
        }
        Ok(Self { window_size, failure_rate_threshold, open_wait, half_open_permitted_calls })
    }

    /// Number of recent calls considered for the failure rate.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Failure-rate percentage at which the breaker opens.
    pub fn failure_rate_threshold(&self) -> f32 {
        self.failure_rate_threshold
    }

    /// How long the breaker stays open before probing.
    pub fn open_wait(&self) -> Duration {
        self.open_wait
    }

    /// Probe budget per half-open period.
    pub fn half_open_permitted_calls(&self) -> usize {
        self.half_open_permitted_calls
    }
}

impl Default for CircuitBreakerConfig {
    /// Window of 5, 50 % threshold, 30 s open wait, 3 probe calls.
    fn default() -> Self {
        Self {
            window_size: 5,
            failure_rate_threshold: 50.0,
            open_wait: Duration::from_secs(30),
            half_open_permitted_calls: 3,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    window: VecDeque<bool>,
    opened_at_millis: u64,
    half_open_budget: usize,
    half_open_successes: usize,
}

/// Circuit breaker guarding the retry-wrapped call.
///
/// Clones share the same interior state via `Arc`, so all handles observe
/// and drive the same circuit lifecycle.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<Mutex<BreakerInner>>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                window: VecDeque::with_capacity(config.window_size),
                opened_at_millis: 0,
                half_open_budget: 0,
                half_open_successes: 0,
            })),
            config,
            clock: Arc::new(MonotonicClock::default()),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Record outcomes into a shared registry instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The most recently committed state.
    ///
    /// `Open` → `HalfOpen` commits lazily on the next permission check, so
    /// an expired open wait still reads as `Open` here until a call arrives.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `call` under breaker protection.
    ///
    /// Rejections return [`PipelineError::Rejected`] without invoking the
    /// call and count as `(circuitBreaker, notPermitted)`; permitted calls
    /// record `(circuitBreaker, successful|failed)` from their outcome.
    pub async fn execute<T, E, Fut, Call>(&self, call: Call) -> Result<T, PipelineError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, PipelineError<E>>> + Send,
        Call: FnOnce() -> Fut + Send,
    {
        if let Err(open_for) = self.try_acquire() {
            self.metrics.record_circuit_breaker_not_permitted();
            return Err(PipelineError::Rejected { open_for });
        }

        let result = call().await;

        match &result {
            Ok(_) => {
                self.metrics.record_circuit_breaker_successful();
                self.on_outcome(true);
            }
            Err(_) => {
                self.metrics.record_circuit_breaker_failed();
                self.on_outcome(false);
            }
        }

        result
    }

    /// Decide whether a call may proceed; `Err` carries how long the
    /// breaker has been open.
    fn try_acquire(&self) -> Result<(), Duration> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = self.clock.now_millis().saturating_sub(inner.opened_at_millis);
                if elapsed >= duration_to_millis(self.config.open_wait) {
                    inner.state = CircuitState::HalfOpen;
                    // This call takes the first probe slot.
                    inner.half_open_budget = self.config.half_open_permitted_calls - 1;
                    inner.half_open_successes = 0;
                    tracing::info!("circuit breaker → half-open");
                    Ok(())
                } else {
                    Err(Duration::from_millis(elapsed))
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_budget > 0 {
                    inner.half_open_budget -= 1;
                    tracing::debug!(
                        remaining = inner.half_open_budget,
                        "circuit breaker: probe call admitted"
                    );
                    Ok(())
                } else {
                    let elapsed = self.clock.now_millis().saturating_sub(inner.opened_at_millis);
                    Err(Duration::from_millis(elapsed))
                }
            }
        }
    }

    /// Commit one permitted call's outcome: window append, threshold
    /// check, and any transition, under a single lock acquisition.
    fn on_outcome(&self, succeeded: bool) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {
                push_bounded(&mut inner.window, succeeded, self.config.window_size);
                if inner.window.len() == self.config.window_size {
                    let rate = failure_rate(&inner.window);
                    if rate >= self.config.failure_rate_threshold {
                        self.trip_open(&mut inner);
                        tracing::error!(
                            failure_rate = rate,
                            threshold = self.config.failure_rate_threshold,
                            "circuit breaker → open"
                        );
                    }
                }
            }
            CircuitState::HalfOpen => {
                push_bounded(&mut inner.window, succeeded, self.config.window_size);
                if succeeded {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_permitted_calls {
                        inner.state = CircuitState::Closed;
                        inner.window.clear();
                        inner.half_open_budget = 0;
                        inner.half_open_successes = 0;
                        tracing::info!("circuit breaker → closed");
                    }
                } else {
                    self.trip_open(&mut inner);
                    tracing::warn!("circuit breaker: probe failed → open");
                }
            }
            // A call admitted under an earlier regime finished after the
            // breaker moved on; its outcome is not applied retroactively.
            CircuitState::Open => {}
        }
    }

    fn trip_open(&self, inner: &mut MutexGuard<'_, BreakerInner>) {
        inner.state = CircuitState::Open;
        inner.opened_at_millis = self.clock.now_millis();
        inner.window.clear();
        inner.half_open_budget = 0;
        inner.half_open_successes = 0;
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("circuit breaker lock poisoned")
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

fn push_bounded(window: &mut VecDeque<bool>, succeeded: bool, capacity: usize) {
    if window.len() == capacity {
        window.pop_front();
    }
    window.push_back(succeeded);
}

fn failure_rate(window: &VecDeque<bool>) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let failures = window.iter().filter(|succeeded| !**succeeded).count();
    failures as f32 / window.len() as f32 * 100.0
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
