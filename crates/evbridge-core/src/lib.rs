//! # evbridge-core: Types and traits for the evbridge client
//!
//! This crate holds everything the dispatcher, the default modules and the
//! client agree on. It contains no OS-specific code; event bases and the
//! native call surface live in `evbridge-module`, the loop itself in
//! `evbridge-executor`.
//!
//! ## Modules
//!
//! - `uid` - Correlation id carried through native `user_data`
//! - `error` - `CoreError`, `OrderViolation`, `CallError`
//! - `codes` - Backend result-code table and submission-code classification
//! - `frame` - Native call frame, buffer refs and completions
//! - `params` - Write parameters block for mutating calls
//! - `event` - `EventBase` and `Notifier` traits
//! - `pool` - `ResourcePool` for reusable native handles
//! - `correlation` - `CorrelationTable` mapping uids to pending calls
//! - `lifecycle` - State gates (`Gate`, `StateTracker`, `Lifecycle`)
//! - `env` - Environment variable utilities for config overrides
//! - `log_level` - `LogLevel` of the native library's own logging
//!
//! ## Call path
//!
//! ```text
//! caller ── Gate ──► CorrelationTable::register ──► submit_work(WorkItem)
//!                                                         │
//!                          (loop thread) execute ◄────────┘
//!                                 │
//!   EventBase::step ──► native completion ──► CorrelationTable::resolve
//!                                                  │
//!                         pool checkin ◄───────────┴──► user callback
//! ```

pub mod uid;
pub mod error;
pub mod codes;
pub mod frame;
pub mod params;
pub mod event;
pub mod pool;
pub mod correlation;
pub mod lifecycle;
pub mod env;
pub mod log_level;

// Re-exports for convenience
pub use uid::Uid;
pub use error::{CallError, CoreError, OrderViolation, Result};
pub use codes::SubmitCode;
pub use frame::{BufferRef, CallFrame, Completion, CompletionHandler, NativeFn, Payload, Record, Bin};
pub use params::{WriteParameters, WritePolicy};
pub use event::{EventBase, Notifier, StepStatus};
pub use pool::ResourcePool;
pub use correlation::CorrelationTable;
pub use lifecycle::{Gate, Lifecycle, StateTracker, StateType, StateValue};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
pub use log_level::LogLevel;
