//! The composed resilience pipeline.
//!
//! Nesting order is fixed and load-bearing: the circuit breaker is
//! outermost, then retry, then the per-attempt deadline, then the
//! operation. The breaker therefore observes one outcome per invocation
//! (not per attempt), a rejection short-circuits below the retry policy
//! entirely, and every attempt gets its own deadline.
//!
//! All three layers share one [`MetricsRegistry`].

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
use crate::clock::Clock;
use crate::deadline::{DeadlineError, DeadlinePolicy};
use crate::fallback::FallbackDispatcher;
use crate::metrics::MetricsRegistry;
use crate::retry::{RetryError, RetryPolicy};
use crate::sleeper::Sleeper;
use crate::wait::Wait;
use crate::PipelineError;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Errors produced while building a pipeline, one per misconfigured layer.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineBuildError {
    #[error(transparent)]
    Deadline(#[from] DeadlineError),
    #[error(transparent)]
    Retry(#[from] RetryError),
    #[error(transparent)]
    CircuitBreaker(#[from] CircuitBreakerError),
}

/// Circuit breaker, retry, and deadline composed around one operation.
///
/// Clones share the breaker state and metrics registry, so a pipeline can
/// be handed to many concurrent callers.
#[derive(Debug, Clone)]
pub struct ResiliencePipeline<E> {
    breaker: CircuitBreaker,
    retry: RetryPolicy<E>,
    deadline: DeadlinePolicy,
    metrics: Arc<MetricsRegistry>,
}

impl<E> ResiliencePipeline<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> ResiliencePipelineBuilder<E> {
        ResiliencePipelineBuilder::new()
    }

    /// The registry all three layers record into.
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    /// Shared handle to the registry, for external read surfaces.
    pub fn metrics_handle(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    /// The breaker's most recently committed state.
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Run `operation` through breaker, retry, and deadline, returning the
    /// raw outcome.
    ///
    /// `operation` may be invoked up to `max_attempts` times per call; it
    /// is never invoked when the breaker rejects.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, PipelineError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let op_cell = Arc::new(Mutex::new(operation));
        let retry = self.retry.clone();
        let deadline = self.deadline.clone();

        self.breaker
            .execute(|| {
                let retry = retry.clone();
                let deadline = deadline.clone();
                let op_cell = Arc::clone(&op_cell);
                async move {
                    retry
                        .execute(|| {
                            let deadline = deadline.clone();
                            let op_cell = Arc::clone(&op_cell);
                            async move {
                                deadline
                                    .execute(move || {
                                        let mut op =
                                            op_cell.lock().expect("operation lock poisoned");
                                        op()
                                    })
                                    .await
                            }
                        })
                        .await
                }
            })
            .await
    }

    /// Run the pipeline and resolve any terminal failure through
    /// `fallbacks`. This entry point always produces a value.
    pub async fn execute_with_fallback<T, Fut, Op>(
        &self,
        operation: Op,
        fallbacks: &FallbackDispatcher<T, E>,
    ) -> T
    where
        T: Clone + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        fallbacks.resolve(self.execute(operation).await)
    }
}

/// Builder exposing the full configuration surface of the pipeline.
pub struct ResiliencePipelineBuilder<E> {
    deadline: Duration,
    max_attempts: usize,
    wait: Wait,
    retry_when: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    window_size: usize,
    failure_rate_threshold: f32,
    open_wait: Duration,
    half_open_permitted_calls: usize,
    metrics: Option<Arc<MetricsRegistry>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<E> ResiliencePipelineBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Defaults: 2 s deadline, 2 attempts with a fixed 500 ms wait, window
    /// of 5 at a 50 % failure-rate threshold, 30 s open wait, 3 probe
    /// calls.
    pub fn new() -> Self {
        Self {
            deadline: Duration::from_secs(2),
            max_attempts: 2,
            wait: Wait::fixed(Duration::from_millis(500)),
            retry_when: Arc::new(|_| true),
            window_size: 5,
            failure_rate_threshold: 50.0,
            open_wait: Duration::from_secs(30),
            half_open_permitted_calls: 3,
            metrics: None,
            sleeper: None,
            clock: None,
        }
    }

    /// Wall-clock budget for one operation attempt. Keep this strictly
    /// shorter than the operation's own transport timeouts.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Total attempts per invocation (initial + retries).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Fixed wait between attempts.
    pub fn inter_attempt_wait(mut self, delay: Duration) -> Self {
        self.wait = Wait::fixed(delay);
        self
    }

    /// Full wait strategy between attempts.
    pub fn wait(mut self, wait: Wait) -> Self {
        self.wait = wait;
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

    /// Sliding-window size for the breaker's failure rate.
    pub fn window_size(mut self, size: usize) -> Self {
        self.window_size = size;
        self
    }

    /// Failure-rate percentage at which the breaker opens.
    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    /// How long the breaker stays open before probing recovery.
    pub fn open_wait(mut self, wait: Duration) -> Self {
        self.open_wait = wait;
        self
    }

    /// Probe budget per half-open period.
    pub fn half_open_permitted_calls(mut self, calls: usize) -> Self {
        self.half_open_permitted_calls = calls;
        self
    }

    /// Share a metrics registry across pipelines (or with a read surface).
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Inject a custom sleeper for the retry wait (tests).
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Some(Arc::new(sleeper));
        self
    }

    /// Inject a custom clock for the breaker's open-wait timer (tests).
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn build(self) -> Result<ResiliencePipeline<E>, PipelineBuildError> {
        let metrics =
            self.metrics.unwrap_or_else(|| Arc::new(MetricsRegistry::new()));

        let deadline =
            DeadlinePolicy::new(self.deadline)?.with_metrics(Arc::clone(&metrics));

        let retry_when = self.retry_when;
        let mut retry_builder = RetryPolicy::builder()
            .max_attempts(self.max_attempts)
            .wait(self.wait)
            .retry_when(move |e: &E| retry_when(e))
            .with_metrics(Arc::clone(&metrics));
        if let Some(sleeper) = self.sleeper {
            retry_builder = retry_builder.with_sleeper(sleeper);
        }
        let retry = retry_builder.build()?;

        let breaker_config = CircuitBreakerConfig::new(
            self.window_size,
            self.failure_rate_threshold,
            self.open_wait,
            self.half_open_permitted_calls,
        )?;
        let mut breaker =
            CircuitBreaker::new(breaker_config).with_metrics(Arc::clone(&metrics));
        if let Some(clock) = self.clock {
            breaker = breaker.with_clock(clock);
        }

        Ok(ResiliencePipeline { breaker, retry, deadline, metrics })
    }
}

impl<E> Default for ResiliencePipelineBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InstantSleeper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct TestError(String);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "TestError: {}", self.0)
        }
    }

    impl std::error::Error for TestError {}

    #[test]
    fn builder_surfaces_layer_errors() {
        let err = ResiliencePipeline::<TestError>::builder()
            .deadline(Duration::ZERO)
            .build()
            .expect_err("zero deadline");
        assert!(matches!(err, PipelineBuildError::Deadline(_)));

        let err = ResiliencePipeline::<TestError>::builder()
            .max_attempts(0)
            .build()
            .expect_err("zero attempts");
        assert!(matches!(err, PipelineBuildError::Retry(_)));

        let err = ResiliencePipeline::<TestError>::builder()
            .window_size(0)
            .build()
            .expect_err("zero window");
        assert!(matches!(err, PipelineBuildError::CircuitBreaker(_)));
    }

    #[tokio::test]
    async fn breaker_observes_one_outcome_per_invocation() {
        let pipeline: ResiliencePipeline<TestError> = ResiliencePipeline::builder()
            .max_attempts(3)
            .with_sleeper(InstantSleeper)
            .window_size(2)
            .failure_rate_threshold(100.0)
            .build()
            .expect("valid pipeline");

        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations_clone = invocations.clone();

        let result = pipeline
            .execute(|| {
                let invocations = invocations_clone.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError("down".into()))
                }
            })
            .await;

        // Three attempts underneath, but the breaker saw one failed call.
        assert!(result.expect_err("exhausted").is_retries_exhausted());
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        let snap = pipeline.metrics().snapshot();
        assert_eq!(snap.circuit_breaker_failed, 1);
        assert_eq!(snap.retry_failed_with_retry, 1);
    }

    #[tokio::test]
    async fn open_breaker_short_circuits_retry_and_operation() {
        let pipeline: ResiliencePipeline<TestError> = ResiliencePipeline::builder()
            .max_attempts(3)
            .with_sleeper(InstantSleeper)
            .window_size(1)
            .failure_rate_threshold(100.0)
            .build()
            .expect("valid pipeline");

        let invocations = Arc::new(AtomicUsize::new(0));

        // First invocation exhausts retries and trips the one-slot window.
        let invocations_clone = invocations.clone();
        let _ = pipeline
            .execute(|| {
                let invocations = invocations_clone.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError("down".into()))
                }
            })
            .await;
        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        assert_eq!(pipeline.breaker_state(), CircuitState::Open);

        // Second invocation never reaches retry or the operation.
        let invocations_clone = invocations.clone();
        let result = pipeline
            .execute(|| {
                let invocations = invocations_clone.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(42)
                }
            })
            .await;

        assert!(result.expect_err("rejected").is_rejected());
        assert_eq!(invocations.load(Ordering::SeqCst), 3, "operation untouched while open");
        assert_eq!(pipeline.metrics().snapshot().circuit_breaker_not_permitted, 1);
    }

    #[tokio::test]
    async fn fallback_entry_point_always_yields_a_value() {
        let pipeline: ResiliencePipeline<TestError> = ResiliencePipeline::builder()
            .max_attempts(2)
            .with_sleeper(InstantSleeper)
            .build()
            .expect("valid pipeline");
        let fallbacks = FallbackDispatcher::builder("fallback")
            .on_operation_failure("retry fallback")
            .build();

        let value = pipeline
            .execute_with_fallback(|| async { Ok::<_, TestError>("real") }, &fallbacks)
            .await;
        assert_eq!(value, "real");

        let value = pipeline
            .execute_with_fallback(
                || async { Err::<&str, _>(TestError("down".into())) },
                &fallbacks,
            )
            .await;
        assert_eq!(value, "retry fallback");
    }
}
