//! Dispatcher configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use evbridge_executor::config::{DispatcherConfig, SubmitFailurePolicy};
//!
//! let config = DispatcherConfig::from_env()
//!     .idle_wait(Duration::from_micros(500))
//!     .submit_failure_policy(SubmitFailurePolicy::Fail);
//! ```

pub mod defaults;

use evbridge_core::env::{env_get, env_get_str};
use std::str::FromStr;
use std::time::Duration;

/// Handling of items whose native submission failed client-side (-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmitFailurePolicy {
    /// Put the item back at the end of the queue.
    #[default]
    Retry,
    /// Complete the item's frame with the failure code.
    Fail,
}

impl FromStr for SubmitFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "fail" => Ok(Self::Fail),
            other => Err(format!("unknown submit failure policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound of one event-base step
    pub idle_wait: Duration,
    /// Client-error handling
    pub submit_failure_policy: SubmitFailurePolicy,
    /// Loop thread name
    pub thread_name: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DispatcherConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `EVB_IDLE_WAIT_US` - Step bound in microseconds
    /// - `EVB_SUBMIT_FAILURE_POLICY` - `retry` or `fail`
    /// - `EVB_THREAD_NAME` - Loop thread name
    pub fn from_env() -> Self {
        let policy = env_get_str("EVB_SUBMIT_FAILURE_POLICY", defaults::SUBMIT_FAILURE_POLICY);
        Self {
            idle_wait: Duration::from_micros(env_get("EVB_IDLE_WAIT_US", defaults::IDLE_WAIT_US)),
            submit_failure_policy: policy.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to retry");
                SubmitFailurePolicy::Retry
            }),
            thread_name: env_get_str("EVB_THREAD_NAME", defaults::THREAD_NAME),
        }
    }

    /// Library defaults, no environment lookup.
    pub fn new() -> Self {
        Self {
            idle_wait: Duration::from_micros(defaults::IDLE_WAIT_US),
            submit_failure_policy: SubmitFailurePolicy::Retry,
            thread_name: defaults::THREAD_NAME.to_string(),
        }
    }

    // Builder methods

    pub fn idle_wait(mut self, d: Duration) -> Self {
        self.idle_wait = d;
        self
    }

    pub fn submit_failure_policy(mut self, policy: SubmitFailurePolicy) -> Self {
        self.submit_failure_policy = policy;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DispatcherConfig::new();
        assert_eq!(config.idle_wait, Duration::from_micros(1000));
        assert_eq!(config.submit_failure_policy, SubmitFailurePolicy::Retry);
        assert_eq!(config.thread_name, "evbridge-loop");
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("Fail".parse::<SubmitFailurePolicy>(), Ok(SubmitFailurePolicy::Fail));
        assert_eq!(" retry ".parse::<SubmitFailurePolicy>(), Ok(SubmitFailurePolicy::Retry));
        assert!("drop".parse::<SubmitFailurePolicy>().is_err());
    }

    #[test]
    fn test_builder() {
        let config = DispatcherConfig::new()
            .idle_wait(Duration::from_micros(50))
            .submit_failure_policy(SubmitFailurePolicy::Fail)
            .thread_name("test-loop");
        assert_eq!(config.idle_wait, Duration::from_micros(50));
        assert_eq!(config.submit_failure_policy, SubmitFailurePolicy::Fail);
        assert_eq!(config.thread_name, "test-loop");
    }
}
