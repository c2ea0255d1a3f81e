//! Retry policy: a pure decision function over failure classification and
//! attempt count. The policy never sleeps or performs I/O; callers own the
//! actual waiting, which keeps the policy deterministic to test.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{FailureKind, TranscriptionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after waiting this long.
    RetryAfter(Duration),
    /// Mark the work failed, do not retry.
    GiveUp,
}

/// Exponential backoff with jitter, capped at a maximum delay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do after a failed attempt. `attempt` is the number of
    /// attempts already made, starting at 1.
    ///
    /// Fatal failures and exhausted budgets give up immediately. A
    /// rate-limit hint from the service overrides the computed backoff.
    pub fn decide(
        &self,
        kind: FailureKind,
        attempt: u32,
        retry_after_hint: Option<Duration>,
    ) -> RetryDecision {
        if kind == FailureKind::Fatal || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        if let Some(hint) = retry_after_hint {
            return RetryDecision::RetryAfter(hint.min(self.max_delay));
        }
        RetryDecision::RetryAfter(self.backoff(attempt))
    }

    pub fn decide_for(&self, error: &TranscriptionError, attempt: u32) -> RetryDecision {
        self.decide(error.kind, attempt, error.retry_after)
    }

    /// `base_delay * 2^(attempt-1)`, capped, then jittered into
    /// `[0.5, 1.0]` of the computed delay so many chunks retrying at once
    /// do not resynchronize.
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let exponential = self.base_delay.saturating_mul(1u32 << shift);
        let capped = exponential.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.5..=1.0);
        Duration::from_secs_f64(capped.as_secs_f64() * jitter)
    }
}
