//! evbridge-client: record operations over the event-loop dispatcher.
//!
//! # Layering
//!
//! ```text
//! Client            connect / shutdown, async ops, *_blocking ops
//!   Capabilities    one impl per op group, picked by (version, kind)
//!     Session       pins, correlation table, handle pool, dispatch
//!       EventLoopDispatcher (evbridge-executor)
//!         CallSurface + EventBase (evbridge-module)
//! ```
//!
//! Callbacks passed to async operations run on the loop thread. They must
//! not block on another call of the same client; use the `*_blocking`
//! variants from other threads instead.
//!
//! # Ordering
//!
//! `connect` creates the cluster before the loop starts. `add_host` and
//! `active_hosts` require a live cluster and a running loop. Record and
//! info operations only require a running loop; `shutdown` stops it, so
//! afterwards they all fail with `CoreError::OrderViolation`.
//! `calculate_digest` is not gated at all.

pub mod capability;
pub mod client;
pub mod config;
pub mod key;
pub mod session;
pub mod unsupported;
pub mod v2;

pub use capability::{BackendVersion, Capabilities, InfoReply, LibraryKind, RecordReply};
pub use client::Client;
pub use config::ClientConfig;
pub use key::{Digest, RecordKey};
pub use session::{BoxedEventBase, HandleKind, Pins, Session};
pub use v2::ClusterStates;

pub use evbridge_core::error::{CallError, CoreError, Result};
pub use evbridge_core::frame::{Bin, Record};
pub use evbridge_core::log_level::LogLevel;
pub use evbridge_core::params::{WriteParameters, WritePolicy};
