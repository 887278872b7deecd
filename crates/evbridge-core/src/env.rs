//! Environment variable utilities
//!
//! Config structs start from compile-time defaults and let `EVB_*`
//! environment variables override individual fields.
//!
//! # Usage
//!
//! ```ignore
//! use evbridge_core::env::{env_get, env_get_bool};
//!
//! let cap: usize = env_get("EVB_POOL_CAPACITY", 1000);
//! let verbose = env_get_bool("EVB_VERBOSE", false);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as `T`, or `default` when unset or
/// unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as optional value
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
///
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as string, or return default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
