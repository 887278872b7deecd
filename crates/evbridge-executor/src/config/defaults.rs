//! Library defaults for the dispatcher.
//!
//! Override at runtime with the matching `EVB_*` variable.

/// Upper bound of one event-base step when there is no work (µs).
pub const IDLE_WAIT_US: u64 = 1000;

/// What to do with an item whose submission returned the client-error code.
pub const SUBMIT_FAILURE_POLICY: &str = "retry";

/// Name of the loop thread.
pub const THREAD_NAME: &str = "evbridge-loop";
