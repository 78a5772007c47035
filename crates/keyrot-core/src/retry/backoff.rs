//! Delay between attempts

use crate::types::{RetryPolicy, RetryStrategy};
use rand::Rng;
use std::time::Duration;

/// Delay to wait after failed attempt number `attempt` (1-based)
///
/// The strategy's delay is capped at `max_delay_ms`; jitter then adds up to a
/// quarter of the capped value.
///
/// ```rust
/// use keyrot_core::retry::backoff_delay;
/// use keyrot_core::{RetryPolicy, RetryStrategy};
///
/// let policy = RetryPolicy {
///     max_attempts: 4,
///     strategy: RetryStrategy::ExponentialBackoff,
///     backoff_multiplier: 3.0,
///     initial_delay_ms: 50,
///     max_delay_ms: 400,
/// };
///
/// assert_eq!(backoff_delay(&policy, 1, false).as_millis(), 50);
/// assert_eq!(backoff_delay(&policy, 2, false).as_millis(), 150);
/// assert_eq!(backoff_delay(&policy, 3, false).as_millis(), 400);
/// ```
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32, jitter: bool) -> Duration {
    let step = attempt.saturating_sub(1);

    let base_ms = match policy.strategy {
        RetryStrategy::None => 0,
        RetryStrategy::FixedDelay => policy.initial_delay_ms,
        RetryStrategy::LinearBackoff => policy
            .initial_delay_ms
            .saturating_mul(u64::from(step) + 1),
        RetryStrategy::ExponentialBackoff => {
            let factor = policy.backoff_multiplier.max(1.0).powi(step.min(32) as i32);
            (policy.initial_delay_ms as f64 * factor).min(u64::MAX as f64) as u64
        }
    };

    let capped_ms = base_ms.min(policy.max_delay_ms);
    let spread = if jitter { capped_ms / 4 } else { 0 };
    let extra_ms = if spread > 0 {
        rand::rng().random_range(0..=spread)
    } else {
        0
    };

    Duration::from_millis(capped_ms + extra_ms)
}
