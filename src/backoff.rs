//! Bounded exponential backoff with jitter for reconnect scheduling.
//!
//! The cloud bridge throttles devices that hammer it after an outage, so
//! reconnect attempts are spaced out exponentially: each interval is double
//! the previous one, capped at a maximum, with a random jitter added so a
//! fleet of devices does not reconnect in lockstep.

use std::time::Duration;

use rand::Rng;
use thiserror::Error;

/// Invalid backoff parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("initial backoff must be greater than zero")]
    ZeroInitial,
    #[error("maximum backoff must be greater than zero")]
    ZeroMax,
    #[error("maximum backoff must be >= initial backoff")]
    MaxBelowInitial,
}

/// Exponential backoff schedule bounded by a maximum interval.
///
/// `next()` returns the current interval plus `[0, jitter)` of random noise,
/// then doubles the interval up to the configured maximum. `reset()` restores
/// the initial interval after a successful connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff schedule.
    ///
    /// All parameters are taken in milliseconds of resolution; `jitter` is
    /// the exclusive upper bound of the random noise added to each interval.
    pub fn new(initial: Duration, max: Duration, jitter: Duration) -> Result<Self, BackoffError> {
        if initial.is_zero() {
            return Err(BackoffError::ZeroInitial);
        }
        if max.is_zero() {
            return Err(BackoffError::ZeroMax);
        }
        if max < initial {
            return Err(BackoffError::MaxBelowInitial);
        }

        Ok(Self {
            initial,
            max,
            jitter,
            current: initial,
        })
    }

    /// Restore the initial interval. Called after a successful connect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Return the next interval to wait and advance the schedule.
    pub fn next(&mut self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..jitter_ms))
        };
        let interval = self.current + jitter;

        self.current = (self.current * 2).min(self.max);

        interval
    }

    /// The interval the next call to [`next`](Self::next) will be based on.
    pub fn current(&self) -> Duration {
        self.current
    }
}
