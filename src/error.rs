//! Error types for the resilience pipeline.
//!
//! Every failure the pipeline can produce is one of four terminal kinds:
//! the operation itself failed, the per-attempt deadline fired, the circuit
//! breaker rejected the call, or retries ran out. All four stop at the
//! fallback dispatcher; callers of the fallback-resolving entry point never
//! see one of these raised.

use std::time::Duration;
use thiserror::Error;

/// Unified error type produced by the pipeline and its layers.
///
/// `E` is the error type of the protected operation. `Operation` is the only
/// variant the retry policy will re-attempt (subject to its predicate);
/// `DeadlineExceeded` and `Rejected` always pass through unretried.
#[derive(Debug, Clone, Error)]
pub enum PipelineError<E> {
    /// The operation did not complete within the configured deadline.
    #[error("operation exceeded its {deadline:?} deadline (abandoned after {elapsed:?})")]
    DeadlineExceeded {
        /// Wall-clock time spent before giving up.
        elapsed: Duration,
        /// The configured per-attempt deadline.
        deadline: Duration,
    },
    /// The circuit breaker refused to run the operation.
    #[error("circuit breaker rejected the call (open for {open_for:?})")]
    Rejected {
        /// How long the breaker has been open (or probing) at rejection time.
        open_for: Duration,
    },
    /// Every permitted attempt failed with a retryable error.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Total attempts made, including the initial one.
        attempts: usize,
        /// The failure observed on the final attempt.
        #[source]
        last: E,
    },
    /// The operation failed and was not (or could not be) retried.
    #[error(transparent)]
    Operation(E),
}

impl<E> PipelineError<E> {
    /// True if the per-attempt deadline fired.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// True if the circuit breaker rejected the call without running it.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    /// True if the retry budget was used up.
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }

    /// True if this wraps a failure from the operation itself.
    pub fn is_operation(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// The underlying operation failure, when one exists.
    ///
    /// Returns the wrapped error for `Operation` and the last recorded
    /// failure for `RetriesExhausted`; deadline and rejection errors carry
    /// no operation-level cause.
    pub fn cause(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Consume the error, yielding the operation failure if one exists.
    pub fn into_cause(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    /// Deadline details as `(elapsed, deadline)`, if this is a deadline error.
    pub fn deadline_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::DeadlineExceeded { elapsed, deadline } => Some((*elapsed, *deadline)),
            _ => None,
        }
    }

    /// Attempt count for `RetriesExhausted`, if applicable.
    pub fn attempts(&self) -> Option<usize> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }
}
