//! `ParkedEventBase`: portable event base.
//!
//! No OS readiness source: a step parks on a condvar until notified or
//! the timeout expires, then runs deferred callbacks. Used off Linux and
//! by backends that only complete through `DeferHandle`.

use crate::deferred::{DeferHandle, DeferQueue};
use evbridge_core::event::{EventBase, Notifier, StepStatus};
use parking_lot::{Condvar, Mutex};

use std::io;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ParkSignal {
    /// Wake pending.
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Notifier for ParkSignal {
    fn notify(&self) -> io::Result<()> {
        *self.pending.lock() = true;
        self.condvar.notify_one();
        Ok(())
    }
}

pub struct ParkedEventBase {
    signal: Arc<ParkSignal>,
    deferred: Arc<DeferQueue>,
}

impl ParkedEventBase {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            signal: Arc::new(ParkSignal::default()),
            deferred: Arc::new(DeferQueue::new()),
        })
    }

    pub fn defer_handle(&self) -> DeferHandle {
        DeferHandle::new(self.deferred.clone(), self.signal.clone())
    }
}

impl EventBase for ParkedEventBase {
    fn make_notifiable(&mut self) -> io::Result<Arc<dyn Notifier>> {
        Ok(self.signal.clone())
    }

    fn step(&mut self, timeout: Duration) -> StepStatus {
        {
            let mut pending = self.signal.pending.lock();
            if !*pending && self.deferred.is_empty() && !timeout.is_zero() {
                self.signal.condvar.wait_for(&mut pending, timeout);
            }
            // Consume the wake
            *pending = false;
        }

        match self.deferred.run_pending() {
            0 => StepStatus::Idle,
            n => StepStatus::Dispatched(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_step_parks_until_timeout() {
        let mut base = ParkedEventBase::new().unwrap();
        let start = Instant::now();
        assert_eq!(base.step(Duration::from_millis(5)), StepStatus::Idle);
        assert!(start.elapsed() >= Duration::from_millis(4));
    }

    #[test]
    fn test_cross_thread_defer_wakes_step() {
        let mut base = ParkedEventBase::new().unwrap();
        let handle = base.defer_handle();
        let t = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            handle.defer(|| {});
        });

        let start = Instant::now();
        let mut status = StepStatus::Idle;
        while status == StepStatus::Idle && start.elapsed() < Duration::from_secs(5) {
            status = base.step(Duration::from_secs(5));
        }
        t.join().unwrap();
        assert_eq!(status, StepStatus::Dispatched(1));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
