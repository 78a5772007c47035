//! Attempt-level reporting for retried operations

use std::fmt::Display;
use std::time::Duration;

/// Receives the outcome of each attempt made by a [`RetryExecutor`]
///
/// [`RetryExecutor`]: super::RetryExecutor
pub trait AttemptObserver: Send + Sync {
    /// Attempt `attempt` of `max_attempts` failed and the next starts after `delay`
    fn retrying(&self, attempt: u32, max_attempts: u32, error: &dyn Display, delay: Duration);

    /// The operation succeeded on attempt number `attempts`
    fn succeeded(&self, attempts: u32, elapsed: Duration) {
        let _ = (attempts, elapsed);
    }

    /// No further attempt will be made; `retryable` is false when the error
    /// itself ruled out a retry
    fn gave_up(&self, attempts: u32, error: &dyn Display, retryable: bool);
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl AttemptObserver for SilentObserver {
    fn retrying(&self, _: u32, _: u32, _: &dyn Display, _: Duration) {}

    fn gave_up(&self, _: u32, _: &dyn Display, _: bool) {}
}

/// Logs attempts through `tracing` under an operation name
#[derive(Debug, Clone)]
pub struct TracingObserver {
    operation: String,
}

impl TracingObserver {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

impl AttemptObserver for TracingObserver {
    fn retrying(&self, attempt: u32, max_attempts: u32, error: &dyn Display, delay: Duration) {
        tracing::warn!(
            operation = %self.operation,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "{}; retrying",
            error
        );
    }

    fn succeeded(&self, attempts: u32, elapsed: Duration) {
        if attempts > 1 {
            tracing::info!(
                operation = %self.operation,
                attempts,
                elapsed_ms = elapsed.as_millis() as u64,
                "Succeeded after retry"
            );
        }
    }

    fn gave_up(&self, attempts: u32, error: &dyn Display, retryable: bool) {
        if retryable {
            tracing::error!(
                operation = %self.operation,
                attempts,
                "Giving up: {}",
                error
            );
        } else {
            tracing::debug!(operation = %self.operation, "Not retryable: {}", error);
        }
    }
}
