//! Event-base abstraction.
//!
//! An `EventBase` is the native non-blocking event-processing primitive the
//! backend library delivers its completions through. Exactly one thread (the
//! dispatcher loop) ever steps it.
//!
//! # Implementors
//!
//! - `EpollEventBase` (Linux default): epoll + eventfd wakeups.
//! - `ParkedEventBase` (portable): condvar park with timeout.
//!
//! Both live in `evbridge-module`. Creation is done by a factory handed to
//! the dispatcher; destruction is `Drop`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one event-base iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Callbacks ran.
    Dispatched(usize),
    /// Timed out with nothing to do.
    Idle,
    /// The primitive reported an abnormal termination code.
    Fatal(i32),
}

/// Wakes the loop thread out of a step from another thread.
///
/// **Contract:**
/// - `notify()` must NEVER block.
/// - Multiple calls before the loop wakes are coalesced.
pub trait Notifier: Send + Sync {
    fn notify(&self) -> io::Result<()>;
}

/// Native event-processing primitive driven by the dispatcher loop.
///
/// **Contract:** `step()` must return within roughly `timeout`, and sooner
/// when a notifier obtained from `make_notifiable()` fires.
pub trait EventBase: Send + 'static {
    /// Make the base safe for cross-thread notification and return the
    /// handle other threads use to wake it.
    fn make_notifiable(&mut self) -> io::Result<Arc<dyn Notifier>>;

    /// Run one iteration, waiting at most `timeout` for events.
    fn step(&mut self, timeout: Duration) -> StepStatus;
}

impl<E: EventBase + ?Sized> EventBase for Box<E> {
    fn make_notifiable(&mut self) -> io::Result<Arc<dyn Notifier>> {
        (**self).make_notifiable()
    }

    fn step(&mut self, timeout: Duration) -> StepStatus {
        (**self).step(timeout)
    }
}
