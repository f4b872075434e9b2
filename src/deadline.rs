//! Time-bounded execution of a single operation attempt.
//!
//! Races one invocation of the operation against a timer. When the timer
//! wins, the operation's future is dropped; cancellation is best-effort and
//! the timer path never waits on operation teardown. Keep this deadline
//! strictly shorter than any transport-level connect/read timeouts on the
//! operation so it fires first, with the transport timeouts as a backstop.

use crate::metrics::MetricsRegistry;
use crate::PipelineError;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Errors from deadline configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeadlineError {
    /// The deadline must be a positive, finite duration.
    #[error("deadline must be non-zero and finite (got {0:?})")]
    InvalidDeadline(Duration),
}

/// Wraps one operation attempt with a wall-clock deadline.
#[derive(Debug, Clone)]
pub struct DeadlinePolicy {
    deadline: Duration,
    metrics: Arc<MetricsRegistry>,
}

impl DeadlinePolicy {
    /// Create a deadline policy. The default pipeline uses 2 seconds.
    pub fn new(deadline: Duration) -> Result<Self, DeadlineError> {
        if deadline == Duration::ZERO || deadline == Duration::MAX {
            return Err(DeadlineError::InvalidDeadline(deadline));
        }
        Ok(Self { deadline, metrics: Arc::new(MetricsRegistry::new()) })
    }

    /// Record outcomes into a shared registry instead of a private one.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The configured per-attempt deadline.
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run one attempt of `operation` under the deadline.
    ///
    /// Completion before the timer forwards the operation's own result;
    /// the timer firing first abandons the attempt and yields
    /// [`PipelineError::DeadlineExceeded`]. Every outcome that is not a
    /// timeout counts as `(timeLimiter, successful)`; the counter tracks
    /// whether the deadline held, not whether the operation succeeded.
    pub async fn execute<T, E, Fut, Op>(&self, operation: Op) -> Result<T, PipelineError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        let start = Instant::now();

        match tokio::time::timeout(self.deadline, operation()).await {
            Ok(Ok(value)) => {
                self.metrics.record_time_limiter_successful();
                Ok(value)
            }
            Ok(Err(e)) => {
                self.metrics.record_time_limiter_successful();
                Err(PipelineError::Operation(e))
            }
            Err(_) => {
                self.metrics.record_time_limiter_timeout();
                Err(PipelineError::DeadlineExceeded {
                    elapsed: start.elapsed(),
                    deadline: self.deadline,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn rejects_zero_and_unbounded_deadlines() {
        assert!(matches!(
            DeadlinePolicy::new(Duration::ZERO),
            Err(DeadlineError::InvalidDeadline(Duration::ZERO))
        ));
        assert!(DeadlinePolicy::new(Duration::MAX).is_err());
    }

    #[tokio::test]
    async fn fast_operation_completes_with_its_value() {
        let metrics = Arc::new(MetricsRegistry::new());
        let policy = DeadlinePolicy::new(Duration::from_millis(100))
            .expect("valid deadline")
            .with_metrics(metrics.clone());

        let result = policy
            .execute(|| async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, TestError>(42)
            })
            .await;

        assert_eq!(result.expect("operation beat the deadline"), 42);
        assert_eq!(metrics.snapshot().time_limiter_successful, 1);
        assert_eq!(metrics.snapshot().time_limiter_timeout, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_is_abandoned_at_the_deadline() {
        let metrics = Arc::new(MetricsRegistry::new());
        let policy = DeadlinePolicy::new(Duration::from_secs(2))
            .expect("valid deadline")
            .with_metrics(metrics.clone());
        let invocations = Arc::new(AtomicUsize::new(0));
        let invocations_clone = invocations.clone();

        let result = policy
            .execute(|| {
                let invocations = invocations_clone.clone();
                async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    Ok::<_, TestError>(42)
                }
            })
            .await;

        let err = result.expect_err("deadline should fire first");
        assert!(err.is_deadline_exceeded());
        assert_eq!(err.deadline_details().map(|(_, d)| d), Some(Duration::from_secs(2)));
        assert_eq!(invocations.load(Ordering::SeqCst), 1, "attempt was started exactly once");
        assert_eq!(metrics.snapshot().time_limiter_timeout, 1);
    }

    #[tokio::test]
    async fn operation_failure_counts_as_no_timeout() {
        let metrics = Arc::new(MetricsRegistry::new());
        let policy = DeadlinePolicy::new(Duration::from_secs(1))
            .expect("valid deadline")
            .with_metrics(metrics.clone());

        let result: Result<(), _> =
            policy.execute(|| async { Err(TestError("downstream 502".into())) }).await;

        match result.expect_err("operation failed") {
            PipelineError::Operation(e) => assert_eq!(e.0, "downstream 502"),
            other => panic!("expected Operation error, got {:?}", other),
        }
        assert_eq!(metrics.snapshot().time_limiter_successful, 1);
        assert_eq!(metrics.snapshot().time_limiter_timeout, 0);
    }
}
