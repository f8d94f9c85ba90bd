//! Bounded retry with incremental backoff
//!
//! Every network and storage call made by the ingestion pipeline goes through
//! this module. The wait before retry `i` (0-based) is
//! `initial_wait + i * wait_increment`.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget and backoff schedule for one retried operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,

    /// Wait before the first retry
    pub initial_wait: Duration,

    /// Added to the wait for every further retry
    pub wait_increment: Duration,
}

impl RetryPolicy {
    /// Creates a new policy
    pub fn new(max_attempts: u32, initial_wait: Duration, wait_increment: Duration) -> Self {
        Self {
            max_attempts,
            initial_wait,
            wait_increment,
        }
    }

    /// A policy that retries without waiting (useful in tests)
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Returns the wait before the retry with the given 0-based index
    pub fn wait_before_retry(&self, retry_index: u32) -> Duration {
        self.initial_wait + self.wait_increment * retry_index
    }
}

/// Runs `operation` until it succeeds or the attempt budget is spent
///
/// An attempt is retried when it fails with an error accepted by
/// `should_retry_error`, or succeeds with a value accepted by
/// `should_retry_result`. On exhaustion the last error or last retryable value
/// is returned as-is, so callers tell "exhausted" from "terminal" by looking at
/// the returned outcome.
///
/// Cancelling `cancel` during a backoff wait stops retrying and returns the
/// last outcome.
///
/// # Arguments
///
/// * `policy` - Attempt budget and backoff schedule
/// * `operation` - Called with the 0-based attempt index
/// * `should_retry_error` - Retry predicate over errors
/// * `should_retry_result` - Retry predicate over successful values
/// * `cancel` - Cancellation signal checked between attempts
pub async fn retry_incremental<T, E, F, Fut, PE, PR>(
    policy: RetryPolicy,
    mut operation: F,
    should_retry_error: PE,
    should_retry_result: PR,
    cancel: &CancellationToken,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    PE: Fn(&E) -> bool,
    PR: Fn(&T) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let outcome = operation(attempt).await;
        let retryable = match &outcome {
            Ok(value) => should_retry_result(value),
            Err(error) => should_retry_error(error),
        };

        attempt += 1;
        if !retryable || attempt >= max_attempts {
            return outcome;
        }

        let wait = policy.wait_before_retry(attempt - 1);
        tracing::debug!(attempt, ?wait, "Retrying after failed attempt");

        tokio::select! {
            _ = cancel.cancelled() => return outcome,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

/// Retries every error, treating every successful value as final
pub async fn retry_on_error<T, E, F, Fut>(
    policy: RetryPolicy,
    operation: F,
    cancel: &CancellationToken,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_incremental(
        policy,
        operation,
        |e: &E| {
            tracing::warn!("Attempt failed: {}", e);
            true
        },
        |_: &T| false,
        cancel,
    )
    .await
}
