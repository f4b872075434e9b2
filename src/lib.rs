#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Breakwater
//!
//! Shields a caller from an unreliable downstream dependency by composing
//! three policies around a single async operation (a circuit breaker,
//! bounded retry, and a per-attempt deadline) and resolving every terminal
//! failure to a policy-specific fallback value.
//!
//! ## Features
//!
//! - **Per-attempt deadlines** backed by the tokio timer
//! - **Bounded retry** with fixed or exponential waits and optional jitter
//! - **Circuit breaker** with a sliding failure-rate window and half-open
//!   recovery probes
//! - **Fallback dispatch** mapping each failure kind to a substitute value
//! - **Shared call counters** for external inspection, cumulative for the
//!   life of the pipeline
//!
//! ## Quick Start
//!
//! ```rust
//! use breakwater::{FallbackDispatcher, ResiliencePipeline};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct BackendError;
//! impl std::fmt::Display for BackendError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "backend unavailable")
//!     }
//! }
//! impl std::error::Error for BackendError {}
//!
//! #[tokio::main]
//! async fn main() {
//!     let pipeline: ResiliencePipeline<BackendError> = ResiliencePipeline::builder()
//!         .deadline(Duration::from_secs(2))
//!         .max_attempts(2)
//!         .build()
//!         .unwrap();
//!
//!     let fallbacks = FallbackDispatcher::builder("service degraded".to_string())
//!         .on_rejection("handled by circuit breaker fallback".to_string())
//!         .on_timeout("handled by time limiter fallback".to_string())
//!         .on_operation_failure("handled by retry fallback".to_string())
//!         .build();
//!
//!     let body = pipeline
//!         .execute_with_fallback(|| async { Ok::<_, BackendError>("Hello, World!".to_string()) }, &fallbacks)
//!         .await;
//!     assert_eq!(body, "Hello, World!");
//! }
//! ```
//!
//! The nesting order is fixed: circuit breaker outermost, then retry, then
//! the deadline, then the operation. See [`pipeline`] for why the order
//! matters.

pub mod breaker;
pub mod clock;
pub mod deadline;
pub mod error;
pub mod fallback;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod sleeper;
pub mod wait;

// Re-exports
pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use deadline::{DeadlineError, DeadlinePolicy};
pub use error::PipelineError;
pub use fallback::{FallbackDispatcher, FallbackDispatcherBuilder};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use pipeline::{PipelineBuildError, ResiliencePipeline, ResiliencePipelineBuilder};
pub use retry::{RetryError, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use wait::{Jitter, Wait, WaitError};
