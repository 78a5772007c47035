//! Retry loop

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use crate::types::RetryPolicy;

use super::backoff::backoff_delay;
use super::observer::{AttemptObserver, SilentObserver};

/// Builder for a [`RetryExecutor`]
pub struct RetryExecutorBuilder<O = SilentObserver> {
    policy: RetryPolicy,
    observer: O,
    jitter: bool,
}

impl Default for RetryExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutorBuilder {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
            observer: SilentObserver,
            jitter: true,
        }
    }
}

impl<O> RetryExecutorBuilder<O> {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_observer<O2: AttemptObserver>(self, observer: O2) -> RetryExecutorBuilder<O2> {
        RetryExecutorBuilder {
            policy: self.policy,
            observer,
            jitter: self.jitter,
        }
    }

    /// Enable or disable jitter (enabled by default)
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn build(self) -> RetryExecutor<O> {
        RetryExecutor {
            policy: self.policy,
            observer: self.observer,
            jitter: self.jitter,
        }
    }
}

/// Runs an operation until it succeeds or a retry is ruled out
pub struct RetryExecutor<O = SilentObserver> {
    policy: RetryPolicy,
    observer: O,
    jitter: bool,
}

impl<O: AttemptObserver> RetryExecutor<O> {
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op`, retrying errors for which `retryable` holds
    ///
    /// At most `max_attempts` attempts are made (at least one). The delay is
    /// only slept between attempts, never after the last one. The error of
    /// the final attempt is returned as is.
    pub async fn execute<R, F, Fut, T, E>(&self, retryable: R, mut op: F) -> Result<T, E>
    where
        R: Fn(&E) -> bool,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match op().await {
                Ok(value) => {
                    self.observer.succeeded(attempt, start.elapsed());
                    return Ok(value);
                }
                Err(err) => err,
            };

            let can_retry = retryable(&err);
            if !can_retry || attempt >= max_attempts {
                self.observer.gave_up(attempt, &err, can_retry);
                return Err(err);
            }

            let delay = backoff_delay(&self.policy, attempt, self.jitter);
            self.observer.retrying(attempt, max_attempts, &err, delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
