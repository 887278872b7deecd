//! # evbridge-executor: The event-loop dispatcher
//!
//! `EventLoopDispatcher` runs on a dedicated thread and is the only code
//! that ever calls into the native library or steps its event base.
//! Callers on any thread submit `WorkItem`s; completions are delivered on
//! the loop thread.
//!
//! ```text
//!  caller threads                     loop thread
//!  ──────────────                     ───────────
//!  submit_work(item) ──► SegQueue ──► drain: item.execute()
//!        │                                  │
//!        └──► Notifier::notify ──────► EventBase::step ──► completions
//! ```
//!
//! `submit_control` feeds a second queue that is drained first and is not
//! held by `pause`; the client's own synchronous calls go through it.
//!
//! `SyncAdapter` turns any callback-style operation into a blocking call
//! for callers that want one.

pub mod config;
pub mod work;
pub mod dispatcher;
pub mod sync_adapter;

pub use config::{DispatcherConfig, SubmitFailurePolicy};
pub use work::WorkItem;
pub use dispatcher::{DispatcherStates, DispatcherStats, EventLoopDispatcher};
pub use sync_adapter::{Blocking, Completer, SyncAdapter};
