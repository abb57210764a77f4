//! Jittered exponential backoff as a pure decision function.

use crate::error::RealtimeError;
use rand::Rng;
use std::time::Duration;

/// Errors that know whether an operation may be attempted again.
pub trait Retryable {
    /// Returns true if retrying may succeed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for RealtimeError {
    fn is_retryable(&self) -> bool {
        RealtimeError::is_retryable(self)
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay.
    RetryAfter(Duration),
    /// Give up and surface the error.
    Stop,
}

/// Configuration for retry behavior.
///
/// The delay for attempt `n` (0-indexed) is `initial_delay * 2^n` plus a
/// jitter below `jitter`. Once that exceeds `max_delay` the policy stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Largest delay the policy will wait; beyond it, retrying stops.
    pub max_delay: Duration,
    /// Upper bound (exclusive) of the random jitter.
    pub jitter: Duration,
    /// Optional hard cap on the number of attempts.
    pub max_attempts: Option<u32>,
}

impl RetryConfig {
    /// Creates the default policy: 100 ms doubling, 100 ms jitter, 5 s ceiling.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: Duration::from_millis(100),
            max_attempts: None,
        }
    }

    /// Creates a policy that never retries.
    pub fn no_retry() -> Self {
        Self::new().with_max_attempts(1)
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter bound.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Caps the total number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Decides what follows failed attempt `attempt` (0-indexed), given the
    /// error and a jitter sample.
    ///
    /// Pure: the same inputs always give the same decision.
    pub fn decide<E: Retryable + ?Sized>(
        &self,
        attempt: u32,
        error: &E,
        jitter: Duration,
    ) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Stop;
        }
        if self
            .max_attempts
            .is_some_and(|max| attempt.saturating_add(1) >= max)
        {
            return RetryDecision::Stop;
        }

        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self
            .initial_delay
            .saturating_mul(factor)
            .saturating_add(jitter.min(self.jitter));
        if delay > self.max_delay {
            RetryDecision::Stop
        } else {
            RetryDecision::RetryAfter(delay)
        }
    }

    /// Like [`decide`](Self::decide), drawing the jitter at random.
    pub fn decide_jittered<E: Retryable + ?Sized>(&self, attempt: u32, error: &E) -> RetryDecision {
        let bound = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if bound == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..bound))
        };
        self.decide(attempt, error, jitter)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
