//! Blocking wrappers around callback-style operations.
//!
//! `SyncAdapter` starts an asynchronous operation with a `Completer`, then
//! parks the calling thread on a condvar until the completer fires. The
//! completer can be invoked from any thread, including synchronously from
//! inside the operation itself.
//!
//! One call is in flight per adapter; concurrent callers queue on an
//! internal lock. Every call bumps a generation counter, so a completion
//! arriving after its call timed out is recognised and dropped instead of
//! being handed to the next caller.

use evbridge_core::error::{CoreError, Result};
use parking_lot::{Condvar, Mutex};

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Slot<T> {
    generation: u64,
    value: Option<T>,
}

struct Rendezvous<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

/// One-shot completion token for a single blocking call.
pub struct Completer<T> {
    rendezvous: Arc<Rendezvous<T>>,
    generation: u64,
}

impl<T> Completer<T> {
    /// Store the result and wake the waiting caller.
    pub fn complete(self, value: T) {
        let mut slot = self.rendezvous.slot.lock();
        if slot.generation != self.generation {
            tracing::debug!(generation = self.generation, "stale completion discarded");
            return;
        }
        slot.value = Some(value);
        self.rendezvous.ready.notify_all();
    }

    /// The completer as a plain callback.
    pub fn into_callback(self) -> impl FnOnce(T) + Send
    where
        T: Send,
    {
        move |value| self.complete(value)
    }
}

impl<T> fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completer").field("generation", &self.generation).finish()
    }
}

pub struct SyncAdapter<T> {
    rendezvous: Arc<Rendezvous<T>>,
    in_flight: Mutex<()>,
}

impl<T> SyncAdapter<T> {
    pub fn new() -> Self {
        Self {
            rendezvous: Arc::new(Rendezvous {
                slot: Mutex::new(Slot {
                    generation: 0,
                    value: None,
                }),
                ready: Condvar::new(),
            }),
            in_flight: Mutex::new(()),
        }
    }

    /// Wrap `op(completer, args)` into a blocking function of `args`.
    pub fn wrap<A, F>(op: F) -> Blocking<A, T, F>
    where
        F: Fn(Completer<T>, A),
    {
        Blocking {
            op,
            adapter: Self::new(),
            _args: PhantomData,
        }
    }

    /// Start an operation and wait for its completion.
    pub fn call<F>(&self, start: F) -> T
    where
        F: FnOnce(Completer<T>),
    {
        let _one = self.in_flight.lock();
        start(self.begin());

        let mut slot = self.rendezvous.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return value;
            }
            self.rendezvous.ready.wait(&mut slot);
        }
    }

    /// Like `call`, failing with `Timeout` once `timeout` has passed.
    pub fn call_timeout<F>(&self, timeout: Duration, start: F) -> Result<T>
    where
        F: FnOnce(Completer<T>),
    {
        self.try_call(Some(timeout), |completer| {
            start(completer);
            Ok(())
        })
    }

    /// Start a fallible operation and wait for its completion.
    ///
    /// If `start` fails, the completer it was given can never fire and the
    /// error is returned immediately.
    pub fn try_call<E, F>(&self, timeout: Option<Duration>, start: F) -> std::result::Result<T, E>
    where
        E: From<CoreError>,
        F: FnOnce(Completer<T>) -> std::result::Result<(), E>,
    {
        let _one = self.in_flight.lock();
        if let Err(e) = start(self.begin()) {
            self.abandon();
            return Err(e);
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut slot = self.rendezvous.slot.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Ok(value);
            }
            match deadline {
                Some(deadline) => {
                    if self.rendezvous.ready.wait_until(&mut slot, deadline).timed_out() {
                        if let Some(value) = slot.value.take() {
                            return Ok(value);
                        }
                        // Orphan the outstanding completer.
                        slot.generation += 1;
                        return Err(CoreError::Timeout.into());
                    }
                }
                None => self.rendezvous.ready.wait(&mut slot),
            }
        }
    }

    fn begin(&self) -> Completer<T> {
        let mut slot = self.rendezvous.slot.lock();
        slot.generation += 1;
        slot.value = None;
        Completer {
            rendezvous: self.rendezvous.clone(),
            generation: slot.generation,
        }
    }

    fn abandon(&self) {
        let mut slot = self.rendezvous.slot.lock();
        slot.generation += 1;
        slot.value = None;
    }
}

impl<T> Default for SyncAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A callback-style operation turned into a blocking function.
pub struct Blocking<A, T, F> {
    op: F,
    adapter: SyncAdapter<T>,
    _args: PhantomData<fn(A)>,
}

impl<A, T, F> Blocking<A, T, F>
where
    F: Fn(Completer<T>, A),
{
    pub fn call(&self, args: A) -> T {
        self.adapter.call(|completer| (self.op)(completer, args))
    }

    pub fn call_timeout(&self, args: A, timeout: Duration) -> Result<T> {
        self.adapter.call_timeout(timeout, |completer| (self.op)(completer, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_wrap_round_trip() {
        let double = SyncAdapter::wrap(|done: Completer<(i64,)>, x: i64| done.complete((x * 2,)));
        for x in [0, 1, 1000] {
            assert_eq!(double.call(x), (x * 2,));
        }
    }

    #[test]
    fn test_completion_from_other_thread() {
        let adapter = SyncAdapter::new();
        let got = adapter.call(|done| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                done.complete("from loop");
            });
        });
        assert_eq!(got, "from loop");
    }

    #[test]
    fn test_timeout_then_late_completion_is_discarded() {
        let adapter: SyncAdapter<u32> = SyncAdapter::new();
        let mut parked = None;
        let out = adapter.call_timeout(Duration::from_millis(10), |done| parked = Some(done));
        assert!(matches!(out, Err(CoreError::Timeout)));

        // The expired call's completer fires while the next call is waiting.
        let late = parked.take().unwrap();
        let got = adapter.call(|done| {
            late.complete(1);
            done.complete(2);
        });
        assert_eq!(got, 2);
    }

    #[test]
    fn test_try_call_start_failure() {
        let adapter: SyncAdapter<u32> = SyncAdapter::new();
        let out: Result<u32> = adapter.try_call(None, |_done| Err(CoreError::NoHosts));
        assert!(matches!(out, Err(CoreError::NoHosts)));
        assert_eq!(adapter.call(|done| done.complete(5)), 5);
    }

    #[test]
    fn test_concurrent_callers_serialize() {
        let adapter = Arc::new(SyncAdapter::new());
        let handles: Vec<_> = (0..4u32)
            .map(|i| {
                let adapter = adapter.clone();
                thread::spawn(move || {
                    adapter.call(move |done| {
                        thread::spawn(move || done.into_callback()(i));
                    })
                })
            })
            .collect();
        let mut got: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, vec![0, 1, 2, 3]);
    }
}
