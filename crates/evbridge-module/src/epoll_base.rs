//! `EpollEventBase`: Linux event base built on epoll + eventfd.
//!
//! The base owns one epoll instance with a single registration, the
//! notifier's eventfd. Completions reach the loop as deferred callbacks
//! pushed through a `DeferHandle`; they run at the end of every step.

use crate::deferred::{DeferHandle, DeferQueue};
use crate::eventfd_notifier::EventFdNotifier;
use evbridge_core::event::{EventBase, Notifier, StepStatus};

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use std::time::Duration;

const WAKE_TOKEN: u64 = 0;
const MAX_EVENTS: usize = 64;

pub struct EpollEventBase {
    epfd: OwnedFd,
    wake: Arc<EventFdNotifier>,
    deferred: Arc<DeferQueue>,
    events: Vec<libc::epoll_event>,
}

impl EpollEventBase {
    pub fn new() -> io::Result<Self> {
        Self::with_wake(EventFdNotifier::create)
    }

    /// The epoll descriptor is owned from creation on, so every failure
    /// after it closes it again.
    fn with_wake<F>(make_wake: F) -> io::Result<Self>
    where
        F: FnOnce() -> io::Result<EventFdNotifier>,
    {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: `raw` is a fresh descriptor nothing else owns.
        let epfd = unsafe { OwnedFd::from_raw_fd(raw) };

        let base = Self {
            epfd,
            wake: Arc::new(make_wake()?),
            deferred: Arc::new(DeferQueue::new()),
            events: vec![libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS],
        };
        base.register_wake()?;
        Ok(base)
    }

    /// Handle for scheduling callbacks on the thread that steps this base.
    pub fn defer_handle(&self) -> DeferHandle {
        DeferHandle::new(self.deferred.clone(), self.wake.clone())
    }

    fn register_wake(&self) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_ADD, self.wake.fd(), &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl EventBase for EpollEventBase {
    fn make_notifiable(&mut self) -> io::Result<Arc<dyn Notifier>> {
        Ok(self.wake.clone())
    }

    fn step(&mut self, timeout: Duration) -> StepStatus {
        // Work already queued: poll without sleeping.
        let timeout_ms = if !self.deferred.is_empty() || timeout.is_zero() {
            0
        } else {
            timeout.as_millis().clamp(1, i32::MAX as u128) as i32
        };

        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                self.events.as_mut_ptr(),
                self.events.len() as libc::c_int,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return StepStatus::Idle;
            }
            return StepStatus::Fatal(err.raw_os_error().unwrap_or(-1));
        }

        for ev in &self.events[..n as usize] {
            if ev.u64 == WAKE_TOKEN {
                self.wake.drain();
            }
        }

        match self.deferred.run_pending() {
            0 => StepStatus::Idle,
            ran => StepStatus::Dispatched(ran),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn open_fds() -> usize {
        std::fs::read_dir("/proc/self/fd").map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_idle_step_times_out() {
        let mut base = EpollEventBase::new().unwrap();
        let start = Instant::now();
        assert_eq!(base.step(Duration::from_millis(5)), StepStatus::Idle);
        assert!(start.elapsed() >= Duration::from_millis(4));
    }

    #[test]
    fn test_notifier_wakes_step() {
        let mut base = EpollEventBase::new().unwrap();
        let notifier = base.make_notifiable().unwrap();
        notifier.notify().unwrap();
        let start = Instant::now();
        assert_eq!(base.step(Duration::from_secs(5)), StepStatus::Idle);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_deferred_runs_on_step() {
        let mut base = EpollEventBase::new().unwrap();
        let handle = base.defer_handle();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        std::thread::spawn(move || handle.defer(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }))
        .join()
        .unwrap();

        assert_eq!(base.step(Duration::from_secs(5)), StepStatus::Dispatched(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_wakeup_fd_closes_epoll_fd() {
        let before = open_fds();
        for _ in 0..256 {
            let out = EpollEventBase::with_wake(|| Err(io::Error::from_raw_os_error(libc::EMFILE)));
            assert_eq!(out.err().and_then(|e| e.raw_os_error()), Some(libc::EMFILE));
        }
        // Other tests open descriptors concurrently; a leak would show 256.
        assert!(open_fds() < before + 64, "epoll descriptors leaked");
    }
}
