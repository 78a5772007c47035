//! Shared configuration types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backoff applied while another rotation holds the store lock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// How the delay between lock attempts grows
    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Growth factor per attempt under `exponential-backoff`
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Delay after the first failed attempt
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay, before jitter
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: RetryStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            strategy: RetryStrategy::None,
            ..Self::default()
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_initial_delay() -> u64 {
    250
}
fn default_max_delay() -> u64 {
    2000
}

/// How the delay between lock attempts grows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    None,
    FixedDelay,
    #[default]
    ExponentialBackoff,
    LinearBackoff,
}

/// How a rotation is carried out
///
/// `Execute` performs the rotation. `DryRun` walks the same plan, logging each
/// intended action, without invoking the crypto primitive or touching disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStrategy {
    #[default]
    Execute,
    DryRun,
}

impl ExecutionStrategy {
    /// Whether side effects are suppressed
    pub fn is_dry_run(&self) -> bool {
        matches!(self, ExecutionStrategy::DryRun)
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::Execute => write!(f, "execute"),
            ExecutionStrategy::DryRun => write!(f, "dry-run"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_defaults_from_empty_yaml() {
        let policy: RetryPolicy = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(policy.strategy, RetryStrategy::ExponentialBackoff);
    }

    #[test]
    fn test_retry_policy_from_yaml() {
        let yaml = "max_attempts: 5\nstrategy: fixed-delay\ninitial_delay_ms: 10\n";
        let policy: RetryPolicy = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.strategy, RetryStrategy::FixedDelay);
        assert_eq!(policy.initial_delay_ms, 10);
    }

    #[test]
    fn test_execution_strategy_parse() {
        let s: ExecutionStrategy = serde_yaml_ng::from_str("dry-run").unwrap();
        assert!(s.is_dry_run());
        assert_eq!(s.to_string(), "dry-run");
        assert!(!ExecutionStrategy::default().is_dry_run());
    }
}
