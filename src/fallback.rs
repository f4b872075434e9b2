//! Fallback dispatch for terminal pipeline failures.
//!
//! Maps each failure kind to a deterministic substitute value so the
//! caller always receives a result. Dispatch priority is fixed: a breaker
//! rejection wins over deadline inspection, which wins over
//! failure-cause inspection, which wins over the catch-all, so a more
//! specific fallback always beats a less specific one.

use crate::PipelineError;
use std::sync::Arc;

/// Resolves every pipeline outcome to a value. Pure mapping, no I/O;
/// [`FallbackDispatcher::resolve`] never fails.
pub struct FallbackDispatcher<T, E> {
    rejection: T,
    timeout: T,
    operation: T,
    catch_all: T,
    transport_failure: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<T: std::fmt::Debug, E> std::fmt::Debug for FallbackDispatcher<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackDispatcher")
            .field("rejection", &self.rejection)
            .field("timeout", &self.timeout)
            .field("operation", &self.operation)
            .field("catch_all", &self.catch_all)
            .finish()
    }
}

impl<T, E> Clone for FallbackDispatcher<T, E>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            rejection: self.rejection.clone(),
            timeout: self.timeout.clone(),
            operation: self.operation.clone(),
            catch_all: self.catch_all.clone(),
            transport_failure: self.transport_failure.clone(),
        }
    }
}

impl<T, E> FallbackDispatcher<T, E>
where
    T: Clone,
    E: std::fmt::Display,
{
    /// Start a builder; kinds without an explicit value fall back to
    /// `catch_all`.
    pub fn builder(catch_all: T) -> FallbackDispatcherBuilder<T, E> {
        FallbackDispatcherBuilder {
            rejection: None,
            timeout: None,
            operation: None,
            catch_all,
            transport_failure: Arc::new(|_| true),
        }
    }

    /// Map an outcome to its final value.
    ///
    /// Successes pass through untouched. Failures resolve in priority
    /// order: rejection, deadline, operation-cause inspection, catch-all.
    pub fn resolve(&self, outcome: Result<T, PipelineError<E>>) -> T {
        let err = match outcome {
            Ok(value) => return value,
            Err(err) => err,
        };
        tracing::warn!(error = %err, "resolving terminal failure to fallback");
        match err {
            PipelineError::Rejected { .. } => self.rejection.clone(),
            PipelineError::DeadlineExceeded { .. } => self.timeout.clone(),
            PipelineError::RetriesExhausted { last, .. } => self.for_cause(&last),
            PipelineError::Operation(e) => self.for_cause(&e),
        }
    }

    fn for_cause(&self, cause: &E) -> T {
        if (self.transport_failure)(cause) {
            self.operation.clone()
        } else {
            self.catch_all.clone()
        }
    }
}

/// Builder for [`FallbackDispatcher`].
pub struct FallbackDispatcherBuilder<T, E> {
    rejection: Option<T>,
    timeout: Option<T>,
    operation: Option<T>,
    catch_all: T,
    transport_failure: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<T, E> FallbackDispatcherBuilder<T, E>
where
    T: Clone,
{
    /// Value returned when the circuit breaker rejects the call.
    pub fn on_rejection(mut self, value: T) -> Self {
        self.rejection = Some(value);
        self
    }

    /// Value returned when the deadline fires.
    pub fn on_timeout(mut self, value: T) -> Self {
        self.timeout = Some(value);
        self
    }

    /// Value returned when the operation (or its retries) failed with a
    /// transport-layer cause.
    pub fn on_operation_failure(mut self, value: T) -> Self {
        self.operation = Some(value);
        self
    }

    /// Predicate deciding whether an operation failure originated from the
    /// transport/response layer. Defaults to treating every operation
    /// failure as transport-originated.
    pub fn transport_failure<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.transport_failure = Arc::new(predicate);
        self
    }

    pub fn build(self) -> FallbackDispatcher<T, E> {
        FallbackDispatcher {
            rejection: self.rejection.unwrap_or_else(|| self.catch_all.clone()),
            timeout: self.timeout.unwrap_or_else(|| self.catch_all.clone()),
            operation: self.operation.unwrap_or_else(|| self.catch_all.clone()),
            catch_all: self.catch_all,
            transport_failure: self.transport_failure,
        }
    }
}
