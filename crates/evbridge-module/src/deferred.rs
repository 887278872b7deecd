//! Deferred callbacks run on the loop thread.
//!
//! Native code that learns of a completion off the loop thread (or wants
//! to complete after the submitting call has returned) pushes a closure
//! through a `DeferHandle`. The owning event base runs it during its next
//! `step()`, so completions always execute on the loop thread.

use crossbeam_queue::SegQueue;
use evbridge_core::event::Notifier;
use std::fmt;
use std::sync::Arc;

pub type Deferred = Box<dyn FnOnce() + Send>;

/// Lock-free queue owned by an event base.
#[derive(Default)]
pub struct DeferQueue {
    queue: SegQueue<Deferred>,
}

impl DeferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push(&self, f: Deferred) {
        self.queue.push(f);
    }

    /// Run the callbacks queued at the time of the call.
    ///
    /// Callbacks deferred while running wait for the next pass, so a
    /// callback that re-defers itself cannot pin the loop.
    pub fn run_pending(&self) -> usize {
        let n = self.queue.len();
        let mut ran = 0;
        for _ in 0..n {
            match self.queue.pop() {
                Some(f) => {
                    f();
                    ran += 1;
                }
                None => break,
            }
        }
        ran
    }
}

/// Cloneable handle for scheduling work on an event base's loop thread.
#[derive(Clone)]
pub struct DeferHandle {
    queue: Arc<DeferQueue>,
    notifier: Arc<dyn Notifier>,
}

impl DeferHandle {
    pub fn new(queue: Arc<DeferQueue>, notifier: Arc<dyn Notifier>) -> Self {
        Self { queue, notifier }
    }

    /// Schedule `f` for the next step and wake the base.
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue.push(Box::new(f));
        if let Err(e) = self.notifier.notify() {
            // The callback still runs on the next idle timeout.
            tracing::warn!(error = %e, "deferred callback wakeup failed");
        }
    }
}

impl fmt::Debug for DeferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferHandle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier(AtomicUsize);

    impl Notifier for CountingNotifier {
        fn notify(&self) -> io::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_defer_notifies_and_runs_in_order() {
        let queue = Arc::new(DeferQueue::new());
        let notifier = Arc::new(CountingNotifier::default());
        let handle = DeferHandle::new(queue.clone(), notifier.clone());

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            handle.defer(move || seen.lock().push(i));
        }
        assert_eq!(notifier.0.load(Ordering::SeqCst), 3);
        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_redeferred_callback_waits_for_next_pass() {
        let queue = Arc::new(DeferQueue::new());
        let handle = DeferHandle::new(queue.clone(), Arc::new(CountingNotifier::default()));
        let again = handle.clone();
        handle.defer(move || again.defer(|| {}));

        assert_eq!(queue.run_pending(), 1);
        assert_eq!(queue.run_pending(), 1);
        assert_eq!(queue.run_pending(), 0);
    }
}
