//! Client configuration
//!
//! Compile-time defaults with runtime environment overrides, same scheme
//! as `DispatcherConfig` (which is embedded here).

pub mod defaults;

use evbridge_core::env::{env_get, env_get_bool, env_get_opt};
use evbridge_executor::DispatcherConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Cap on recycled uids; `None` keeps every one.
    pub max_object_pool_size: Option<usize>,
    /// Uids minted at construction
    pub initial_pool_size: usize,
    /// Idle handles kept per kind
    pub pool_capacity: usize,
    /// Backend timeout per call
    pub timeout_ms: u32,
    /// Added to `timeout_ms` to bound blocking calls
    pub blocking_grace: Duration,
    /// Leave the native library's own logging on. Off switches it to
    /// `LogLevel::NoLogging` at connect.
    pub native_logging: bool,
    pub dispatcher: DispatcherConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ClientConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `EVB_MAX_OBJECT_POOL_SIZE` - Uid free-list cap; negative = unbounded
    /// - `EVB_INITIAL_POOL_SIZE` - Uids minted up front
    /// - `EVB_POOL_CAPACITY` - Idle handles kept per kind
    /// - `EVB_TIMEOUT_MS` - Backend timeout per call
    /// - `EVB_BLOCKING_GRACE_MS` - Extra wait for blocking calls
    /// - `EVB_NATIVE_LOGGING` - Keep native library logging on (1/true/yes/on)
    ///
    /// plus everything `DispatcherConfig::from_env` reads.
    pub fn from_env() -> Self {
        let max: i64 = env_get("EVB_MAX_OBJECT_POOL_SIZE", defaults::MAX_OBJECT_POOL_SIZE as i64);
        Self {
            max_object_pool_size: usize::try_from(max).ok(),
            initial_pool_size: env_get("EVB_INITIAL_POOL_SIZE", defaults::INITIAL_POOL_SIZE),
            pool_capacity: env_get("EVB_POOL_CAPACITY", defaults::POOL_CAPACITY),
            timeout_ms: env_get("EVB_TIMEOUT_MS", defaults::TIMEOUT_MS),
            blocking_grace: Duration::from_millis(
                env_get_opt("EVB_BLOCKING_GRACE_MS").unwrap_or(defaults::BLOCKING_GRACE_MS),
            ),
            native_logging: env_get_bool("EVB_NATIVE_LOGGING", defaults::NATIVE_LOGGING),
            dispatcher: DispatcherConfig::from_env(),
        }
    }

    /// Library defaults, no environment lookup.
    pub fn new() -> Self {
        Self {
            max_object_pool_size: Some(defaults::MAX_OBJECT_POOL_SIZE),
            initial_pool_size: defaults::INITIAL_POOL_SIZE,
            pool_capacity: defaults::POOL_CAPACITY,
            timeout_ms: defaults::TIMEOUT_MS,
            blocking_grace: Duration::from_millis(defaults::BLOCKING_GRACE_MS),
            native_logging: defaults::NATIVE_LOGGING,
            dispatcher: DispatcherConfig::new(),
        }
    }

    // Builder methods

    pub fn max_object_pool_size(mut self, max: Option<usize>) -> Self {
        self.max_object_pool_size = max;
        self
    }

    pub fn initial_pool_size(mut self, n: usize) -> Self {
        self.initial_pool_size = n;
        self
    }

    pub fn pool_capacity(mut self, n: usize) -> Self {
        self.pool_capacity = n;
        self
    }

    pub fn timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn blocking_grace(mut self, d: Duration) -> Self {
        self.blocking_grace = d;
        self
    }

    pub fn native_logging(mut self, on: bool) -> Self {
        self.native_logging = on;
        self
    }

    pub fn dispatcher(mut self, config: DispatcherConfig) -> Self {
        self.dispatcher = config;
        self
    }

    /// Prefill actually applied: never more than the free list may hold.
    pub(crate) fn prefill(&self) -> usize {
        match self.max_object_pool_size {
            Some(max) => self.initial_pool_size.min(max),
            None => self.initial_pool_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new();
        assert_eq!(config.max_object_pool_size, Some(4096));
        assert_eq!(config.initial_pool_size, 1024);
        assert_eq!(config.pool_capacity, 1000);
        assert_eq!(config.timeout_ms, 1000);
        assert!(!config.native_logging);
    }

    #[test]
    fn test_prefill_clamped_to_cap() {
        let config = ClientConfig::new().max_object_pool_size(Some(10)).initial_pool_size(50);
        assert_eq!(config.prefill(), 10);
        assert_eq!(config.max_object_pool_size(None).prefill(), 50);
    }

    #[test]
    fn test_negative_cap_from_env_is_unbounded() {
        std::env::set_var("EVB_MAX_OBJECT_POOL_SIZE", "-1");
        let config = ClientConfig::from_env();
        std::env::remove_var("EVB_MAX_OBJECT_POOL_SIZE");
        assert_eq!(config.max_object_pool_size, None);
    }

    #[test]
    fn test_native_logging_from_env() {
        std::env::set_var("EVB_NATIVE_LOGGING", "yes");
        let config = ClientConfig::from_env();
        std::env::remove_var("EVB_NATIVE_LOGGING");
        assert!(config.native_logging);
    }
}
