//! Error types for evbridge.

use crate::codes;
use crate::uid::Uid;

/// Result type for core and client operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// An operation was invoked while its state type held the wrong value.
///
/// Always surfaced synchronously to the immediate caller; never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot call this now: state type {state_type}, required state {required}, current state {actual}")]
pub struct OrderViolation {
    pub state_type: &'static str,
    pub required: u32,
    pub actual: u32,
}

/// Errors surfaced by the core, the dispatcher and the client.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    OrderViolation(#[from] OrderViolation),

    /// A completion arrived for a uid with no pending call.
    #[error("no pending call for {0}")]
    CorrelationNotFound(Uid),

    /// A blocking call did not complete in time.
    #[error("operation timed out")]
    Timeout,

    /// The selected backend has no implementation for this operation.
    #[error("{op} not available for backend {backend}")]
    Unsupported { op: &'static str, backend: String },

    /// Caller passed something the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// `info` was called with no host given and none connected.
    #[error("no hosts connected")]
    NoHosts,

    /// The native library could not be linked.
    #[error("native library unavailable: {0}")]
    Library(String),

    /// Creating or driving the event base failed.
    #[error("event base: {0}")]
    EventBase(#[source] std::io::Error),

    /// Failed to spawn the loop thread.
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Synchronous native call returned a failure code.
    #[error(transparent)]
    Call(#[from] CallError),
}

/// A backend failure delivered to a completion callback.
///
/// `code` is the raw native return value, `message` its formatted
/// description from the result-code table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct CallError {
    pub code: i32,
    pub message: String,
}

impl CallError {
    /// Build from a native return code using the result-code table.
    pub fn from_code(code: i32) -> Self {
        Self {
            code,
            message: codes::format_code(code),
        }
    }
}
