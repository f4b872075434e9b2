//! Process-lifetime call counters shared by all pipeline layers.
//!
//! Each policy increments its own counters as a side effect of executing;
//! nothing in the pipeline reads them back for decision-making (the
//! breaker's sliding window is separate, internal state). Counters are
//! cumulative for the life of the registry and survive across calls; only
//! an explicit administrative [`MetricsRegistry::reset`] clears them.
//!
//! The registry is an explicitly owned object, not an ambient singleton:
//! construct one per pipeline (or share one across pipelines via `Arc`) so
//! tests can assert against isolated instances.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for every `(policy, outcome kind)` pair the pipeline records.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    time_limiter_successful: AtomicU64,
    time_limiter_timeout: AtomicU64,
    retry_successful_without_retry: AtomicU64,
    retry_successful_with_retry: AtomicU64,
    retry_failed_with_retry: AtomicU64,
    retry_failed_without_retry: AtomicU64,
    circuit_breaker_successful: AtomicU64,
    circuit_breaker_failed: AtomicU64,
    circuit_breaker_not_permitted: AtomicU64,
}

/// Point-in-time copy of every counter, for dashboards and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Deadline-wrapped calls that did not time out (including failures).
    pub time_limiter_successful: u64,
    /// Deadline-wrapped calls abandoned at the deadline.
    pub time_limiter_timeout: u64,
    /// Calls that succeeded on the first attempt.
    pub retry_successful_without_retry: u64,
    /// Calls that succeeded after at least one re-attempt.
    pub retry_successful_with_retry: u64,
    /// Calls that failed with the retry budget exhausted.
    pub retry_failed_with_retry: u64,
    /// Calls that failed without any re-attempt being made.
    pub retry_failed_without_retry: u64,
    /// Breaker-permitted calls that completed successfully.
    pub circuit_breaker_successful: u64,
    /// Breaker-permitted calls that completed with a failure.
    pub circuit_breaker_failed: u64,
    /// Calls rejected by the breaker without executing.
    pub circuit_breaker_not_permitted: u64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_time_limiter_successful(&self) {
        self.time_limiter_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_time_limiter_timeout(&self) {
        self.time_limiter_timeout.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry_successful_without_retry(&self) {
        self.retry_successful_without_retry.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry_successful_with_retry(&self) {
        self.retry_successful_with_retry.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry_failed_with_retry(&self) {
        self.retry_failed_with_retry.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry_failed_without_retry(&self) {
        self.retry_failed_without_retry.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_breaker_successful(&self) {
        self.circuit_breaker_successful.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_breaker_failed(&self) {
        self.circuit_breaker_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_circuit_breaker_not_permitted(&self) {
        self.circuit_breaker_not_permitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy every counter at once.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            time_limiter_successful: self.time_limiter_successful.load(Ordering::Relaxed),
            time_limiter_timeout: self.time_limiter_timeout.load(Ordering::Relaxed),
            retry_successful_without_retry: self
                .retry_successful_without_retry
                .load(Ordering::Relaxed),
            retry_successful_with_retry: self.retry_successful_with_retry.load(Ordering::Relaxed),
            retry_failed_with_retry: self.retry_failed_with_retry.load(Ordering::Relaxed),
            retry_failed_without_retry: self.retry_failed_without_retry.load(Ordering::Relaxed),
            circuit_breaker_successful: self.circuit_breaker_successful.load(Ordering::Relaxed),
            circuit_breaker_failed: self.circuit_breaker_failed.load(Ordering::Relaxed),
            circuit_breaker_not_permitted: self
                .circuit_breaker_not_permitted
                .load(Ordering::Relaxed),
        }
    }

    /// Administrative reset. Counters never clear on their own.
    pub fn reset(&self) {
        self.time_limiter_successful.store(0, Ordering::Relaxed);
        self.time_limiter_timeout.store(0, Ordering::Relaxed);
        self.retry_successful_without_retry.store(0, Ordering::Relaxed);
        self.retry_successful_with_retry.store(0, Ordering::Relaxed);
        self.retry_failed_with_retry.store(0, Ordering::Relaxed);
        self.retry_failed_without_retry.store(0, Ordering::Relaxed);
        self.circuit_breaker_successful.store(0, Ordering::Relaxed);
        self.circuit_breaker_failed.store(0, Ordering::Relaxed);
        self.circuit_breaker_not_permitted.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_reads() {
        let metrics = MetricsRegistry::new();
        metrics.record_time_limiter_timeout();
        metrics.record_time_limiter_timeout();
        metrics.record_circuit_breaker_not_permitted();

        let first = metrics.snapshot();
        assert_eq!(first.time_limiter_timeout, 2);
        assert_eq!(first.circuit_breaker_not_permitted, 1);

        metrics.record_time_limiter_timeout();
        let second = metrics.snapshot();
        assert_eq!(second.time_limiter_timeout, 3, "reads must not reset counters");
    }

    #[test]
    fn reset_clears_everything() {
        let metrics = MetricsRegistry::new();
        metrics.record_retry_failed_with_retry();
        metrics.record_circuit_breaker_successful();
        metrics.record_circuit_breaker_failed();

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}
