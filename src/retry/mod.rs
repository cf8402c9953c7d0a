//! Retry with backoff for transient transport failures.
//!
//! [`RetryExecutor::run`] is generic: any error type, and a caller-supplied
//! hook decides per error whether another attempt is worth it.
//! [`RetryExecutor::run_transient`] plugs in the [`BackendError`]
//! classification used for every backend call.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::error::BackendError;

/// What the error hook wants done after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abort,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Pause before the first retry. `None` retries immediately.
    pub initial_delay: Option<Duration>,
    /// Multiplier applied per retry. `1.0` keeps the delay constant.
    pub backoff: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: None,
            backoff: 1.0,
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// 3 attempts, 1s initial delay, doubling, capped at 10s.
    pub fn smart() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Some(Duration::from_secs(1)),
            backoff: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        let initial = self.initial_delay?;
        let factor = self.backoff.max(1.0).powi(retry as i32);
        let delay = initial.mul_f64(factor.min(u32::MAX as f64));
        Some(delay.min(self.max_delay))
    }
}

/// Runs an async operation until it succeeds, the hook aborts, or attempts
/// run out.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn smart() -> Self {
        Self::new(RetryPolicy::smart())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op`, consulting `on_error(err, attempt)` after each failure.
    /// `attempt` is 1-based. On exhaustion the last error is returned.
    pub async fn run<T, E, F, Fut, H>(&self, mut op: F, mut on_error: H) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        H: FnMut(&E, u32) -> RetryDecision,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= max_attempts {
                tracing::warn!(attempts = attempt, error = %err, "giving up after retries");
                return Err(err);
            }
            if on_error(&err, attempt) == RetryDecision::Abort {
                tracing::debug!(attempt, error = %err, "error is not retryable");
                return Err(err);
            }

            let delay = self.policy.delay_for(attempt - 1);
            tracing::debug!(attempt, ?delay, error = %err, "retrying");
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    /// Run a backend call, retrying only what [`BackendError::is_transient`]
    /// accepts.
    pub async fn run_transient<T, F, Fut>(&self, op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        self.run(op, |err, _| {
            if err.is_transient() {
                RetryDecision::Retry
            } else {
                RetryDecision::Abort
            }
        })
        .await
    }
}
