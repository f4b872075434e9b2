//! Bounded retry around the time-bounded call.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries).
//! - Only [`PipelineError::Operation`] failures are candidates for retry;
//!   the `retry_when` predicate decides whether a given failure is worth
//!   re-attempting.
//! - Deadline failures pass through unretried: a timed-out attempt already
//!   consumed its full time budget, so re-running it would double-spend.
//! - The wait between attempts comes from a [`Wait`] strategy applied via
//!   the injected [`Sleeper`] (production: `TokioSleeper`; tests:
//!   `InstantSleeper`/`TrackingSleeper`).
//!
//! Each invocation classifies its terminal outcome into exactly one retry
//! counter: succeeded without retry, succeeded with retry, failed with
//! retry (budget exhausted), or failed without retry (first failure not
//! retryable, or `max_attempts == 1`).

use crate::metrics::MetricsRegistry;
use crate::{PipelineError, Sleeper, TokioSleeper, Wait};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// `max_attempts` must be > 0.
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(usize),
}

/// Retry policy combining an attempt bound, wait strategy, and retryability
/// predicate.
pub struct RetryPolicy<E> {
    max_attempts: usize,
    wait: Wait,
    retry_when: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<MetricsRegistry>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            wait: self.wait.clone(),
            retry_when: Arc::clone(&self.retry_when),
            sleeper: Arc::clone(&self.sleeper),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("wait", &self.wait)
            .field("retry_when", &"<predicate>")
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Execute the wrapped call with retry semantics.
    ///
    /// `call` is invoked at least once and at most `max_attempts` times.
    pub async fn execute<T, Fut, Call>(&self, mut call: Call) -> Result<T, PipelineError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, PipelineError<E>>> + Send,
        Call: FnMut() -> Fut + Send,
    {
        for attempt in 1..=self.max_attempts {
            match call().await {
                Ok(value) => {
                    if attempt == 1 {
                        self.metrics.record_retry_successful_without_retry();
                    } else {
                        self.metrics.record_retry_successful_with_retry();
                    }
                    return Ok(value);
                }
                Err(PipelineError::Operation(e)) => {
                    if !(self.retry_when)(&e) {
                        if attempt == 1 {
                            self.metrics.record_retry_failed_without_retry();
                        } else {
                            self.metrics.record_retry_failed_with_retry();
                        }
                        return Err(PipelineError::Operation(e));
                    }

                    if attempt == self.max_attempts {
                        // A budget of one means no retry ever happened.
                        if self.max_attempts == 1 {
                            self.metrics.record_retry_failed_without_retry();
                            return Err(PipelineError::Operation(e));
                        }
                        self.metrics.record_retry_failed_with_retry();
                        return Err(PipelineError::RetriesExhausted {
                            attempts: self.max_attempts,
                            last: e,
                        });
                    }

                    let delay = self.wait.delay(attempt);
                    tracing::debug!(attempt, next_delay = ?delay, error = %e, "retrying failed attempt");
                    self.sleeper.sleep(delay).await;
                }
                // Deadline and rejection outcomes are terminal here.
                Err(other) => return Err(other),
            }
        }

        // The loop runs max_attempts >= 1 iterations and every arm either
        // returns or continues; the final iteration always returns.
        debug_assert!(false, "retry loop must return before falling through");
        unreachable!()
    }
}

/// Builder for [`RetryPolicy`].
pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    wait: Wait,
    retry_when: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
    metrics: Arc<MetricsRegistry>,
}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Defaults: 2 total attempts, fixed 500 ms wait, every operation
    /// failure considered retryable.
    pub fn new() -> Self {
        Self {
            max_attempts: 2,
            wait: Wait::fixed(Duration::from_millis(500)),
            retry_when: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    /// Total attempts (initial + retries). Must be > 0.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Wait strategy between attempts.
    pub fn wait(mut self, wait: Wait) -> Self {
        self.wait = wait;
        self
    }

    /// Shorthand for a fixed wait between attempts.
    pub fn inter_attempt_wait(mut self, delay: Duration) -> Self {
        self.wait = Wait::fixed(delay);
        self
    }

    /// Predicate deciding whether an operation failure is retryable.
    pub fn retry_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_when = Arc::new(predicate);
        self
    }

    /// Inject a custom sleeper (tests).
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Record outcomes into a shared registry instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> Result<RetryPolicy<E>, RetryError> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidMaxAttempts(0));
        }
        Ok(RetryPolicy {
            max_attempts: self.max_attempts,
            wait: self.wait,
            retry_when: self.retry_when,
            sleeper: self.sleeper,
            metrics: self.metrics,
        })
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
