//! Inter-attempt wait strategies for the retry policy.
//!
//! Retry indices are 1-based: `delay(1)` is the wait before the first
//! re-attempt. Index 0 (the initial call) always yields zero. Exponential
//! growth saturates at [`MAX_WAIT`] so large attempt counts cannot overflow.

use rand::{rng, Rng};
use std::fmt;
use std::time::Duration;

/// Ceiling applied when a computed wait would overflow (1 hour).
pub const MAX_WAIT: Duration = Duration::from_secs(60 * 60);

/// Errors from wait-strategy configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    /// A cap only makes sense on a growing strategy.
    #[error("cap is only valid for exponential waits")]
    CapOnFixedWait,
    /// The cap must leave room for at least the base delay.
    #[error("cap ({cap:?}) must be >= base ({base:?})")]
    CapBelowBase {
        /// Configured base delay.
        base: Duration,
        /// Offending cap.
        cap: Duration,
    },
}

/// Randomization applied to a computed delay to spread synchronized retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Use the exact computed delay. Keeps attempt timing deterministic.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// Uniform in `[delay / 2, delay]`, keeping a floor under the wait.
    Equal,
}

impl Jitter {
    fn apply<R: Rng>(self, delay: Duration, rng: &mut R) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Duration::ZERO;
        }
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => Duration::from_millis(rng.random_range(millis / 2..=millis)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Fixed(Duration),
    Exponential { base: Duration, cap: Option<Duration> },
}

/// Wait strategy between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Wait {
    kind: Kind,
    jitter: Jitter,
}

impl Wait {
    /// The same delay before every re-attempt.
    pub fn fixed(delay: Duration) -> Self {
        Self { kind: Kind::Fixed(delay), jitter: Jitter::None }
    }

    /// `base * 2^(retry - 1)`, saturating at [`MAX_WAIT`].
    pub fn exponential(base: Duration) -> Self {
        Self { kind: Kind::Exponential { base, cap: None }, jitter: Jitter::None }
    }

    /// Cap an exponential wait at `cap`.
    pub fn with_cap(mut self, cap: Duration) -> Result<Self, WaitError> {
        match &mut self.kind {
            Kind::Fixed(_) => return Err(WaitError::CapOnFixedWait),
            Kind::Exponential { base, cap: slot } => {
                if cap < *base {
                    return Err(WaitError::CapBelowBase { base: *base, cap });
                }
                *slot = Some(cap);
            }
        }
        Ok(self)
    }

    /// Randomize each computed delay.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before re-attempt number `retry` (1-based).
    pub fn delay(&self, retry: usize) -> Duration {
        let raw = self.raw_delay(retry);
        match self.jitter {
            Jitter::None => raw,
            _ => self.jitter.apply(raw, &mut rng()),
        }
    }

    fn raw_delay(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        match &self.kind {
            Kind::Fixed(delay) => *delay,
            Kind::Exponential { base, cap } => {
                let exponent = u32::try_from(retry - 1).unwrap_or(u32::MAX);
                let multiplier = 2u128.saturating_pow(exponent);
                let nanos = base.as_nanos().saturating_mul(multiplier);
                let grown =
                    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)).min(MAX_WAIT);
                cap.map(|c| grown.min(c)).unwrap_or(grown)
            }
        }
    }
}

impl fmt::Display for Wait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Fixed(delay) => write!(f, "fixed({:?})", delay),
            Kind::Exponential { base, cap: Some(cap) } => {
                write!(f, "exponential({:?}, cap {:?})", base, cap)
            }
            Kind::Exponential { base, cap: None } => write!(f, "exponential({:?})", base),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_wait_is_constant() {
        let wait = Wait::fixed(Duration::from_millis(500));
        assert_eq!(wait.delay(0), Duration::ZERO);
        assert_eq!(wait.delay(1), Duration::from_millis(500));
        assert_eq!(wait.delay(7), Duration::from_millis(500));
    }

    #[test]
    fn exponential_wait_doubles() {
        let wait = Wait::exponential(Duration::from_millis(100));
        assert_eq!(wait.delay(1), Duration::from_millis(100));
        assert_eq!(wait.delay(2), Duration::from_millis(200));
        assert_eq!(wait.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn exponential_wait_respects_cap() {
        let wait = Wait::exponential(Duration::from_millis(100))
            .with_cap(Duration::from_millis(250))
            .expect("valid cap");
        assert_eq!(wait.delay(1), Duration::from_millis(100));
        assert_eq!(wait.delay(2), Duration::from_millis(200));
        assert_eq!(wait.delay(3), Duration::from_millis(250));
        assert_eq!(wait.delay(20), Duration::from_millis(250));
    }

    #[test]
    fn exponential_wait_saturates_without_cap() {
        let wait = Wait::exponential(Duration::from_secs(1));
        assert_eq!(wait.delay(500), MAX_WAIT);
    }

    #[test]
    fn cap_rejected_on_fixed_wait() {
        let err = Wait::fixed(Duration::from_millis(100))
            .with_cap(Duration::from_secs(1))
            .expect_err("fixed waits take no cap");
        assert_eq!(err, WaitError::CapOnFixedWait);
    }

    #[test]
    fn cap_below_base_rejected() {
        let err = Wait::exponential(Duration::from_secs(1))
            .with_cap(Duration::from_millis(10))
            .expect_err("cap below base");
        assert!(matches!(err, WaitError::CapBelowBase { .. }));
    }

    #[test]
    fn full_jitter_stays_within_computed_delay() {
        let wait = Wait::fixed(Duration::from_millis(100)).with_jitter(Jitter::Full);
        for _ in 0..50 {
            assert!(wait.delay(1) <= Duration::from_millis(100));
        }
    }

    #[test]
    fn equal_jitter_keeps_a_floor() {
        let wait = Wait::fixed(Duration::from_millis(100)).with_jitter(Jitter::Equal);
        for _ in 0..50 {
            let d = wait.delay(1);
            assert!(d >= Duration::from_millis(50) && d <= Duration::from_millis(100));
        }
    }
}
