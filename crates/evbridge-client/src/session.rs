//! Per-client glue between callers, the correlation table, the handle
//! pool and the dispatcher.
//!
//! A caller builds a `Pins` set holding every buffer the native call
//! reads. `dispatch` moves it into the correlation table next to the
//! callback and submits a frame that only holds raw views into it. When
//! the completion arrives on the loop thread the `Router` resolves the
//! uid, returns pooled handles, and only then runs the callback with no
//! lock held.

use crate::config::ClientConfig;

use evbridge_core::codes;
use evbridge_core::correlation::CorrelationTable;
use evbridge_core::error::{CallError, Result};
use evbridge_core::event::EventBase;
use evbridge_core::frame::{BufferRef, CallFrame, Completion, CompletionHandler, NativeFn, Payload};
use evbridge_core::lifecycle::{Gate, Lifecycle};
use evbridge_core::params::WriteParameters;
use evbridge_core::pool::ResourcePool;
use evbridge_core::Uid;
use evbridge_executor::{Completer, DispatcherStates, EventLoopDispatcher, SyncAdapter, WorkItem};
use evbridge_module::CallSurface;
use parking_lot::Mutex;

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

pub type BoxedEventBase = Box<dyn EventBase>;

/// What a dispatched call's callback receives.
pub type Reply = std::result::Result<Payload, CallError>;
pub type Callback = Box<dyn FnOnce(Reply) + Send>;

/// Kinds of pooled native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    KeyObject,
    WriteParameters,
    Digest,
}

impl HandleKind {
    /// Applied when a handle goes back into the pool.
    fn reset(self) -> fn(&mut Vec<u8>) {
        match self {
            HandleKind::KeyObject => clear,
            HandleKind::WriteParameters => default_params,
            HandleKind::Digest => keep,
        }
    }
}

fn clear(buf: &mut Vec<u8>) {
    buf.clear();
}

fn default_params(buf: &mut Vec<u8>) {
    WriteParameters::default().encode_into(buf);
}

fn keep(_buf: &mut Vec<u8>) {}

enum Pinned {
    Owned(Box<[u8]>),
    Pooled(HandleKind, Vec<u8>),
}

/// Buffers that must outlive a native call, in argument order.
#[derive(Default)]
pub struct Pins {
    items: Vec<Pinned>,
    refs: Vec<BufferRef>,
}

impl Pins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin an owned copy of `bytes`.
    pub fn bytes(&mut self, bytes: impl Into<Vec<u8>>) -> &mut Self {
        let owned = bytes.into().into_boxed_slice();
        self.refs.push(BufferRef::new(&owned));
        self.items.push(Pinned::Owned(owned));
        self
    }

    fn pooled(&mut self, kind: HandleKind, buf: Vec<u8>) {
        // The Vec is never touched again until checkin, so its heap
        // storage stays where the ref points.
        self.refs.push(BufferRef::new(&buf));
        self.items.push(Pinned::Pooled(kind, buf));
    }

    pub fn refs(&self) -> &[BufferRef] {
        &self.refs
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }
}

/// Keeps the completion a synchronous native call delivers before it
/// returns.
#[derive(Default)]
struct Captured(Mutex<Option<Completion>>);

impl CompletionHandler for Captured {
    fn complete(&self, completion: Completion) {
        *self.0.lock() = Some(completion);
    }
}

/// Completion handler shared by every frame of one session.
pub(crate) struct Router {
    table: Mutex<CorrelationTable<Callback, Pins>>,
    pool: Mutex<ResourcePool<HandleKind, Vec<u8>>>,
}

impl Router {
    fn release(&self, pins: Pins) {
        let mut pool = self.pool.lock();
        for item in pins.items {
            if let Pinned::Pooled(kind, buf) = item {
                pool.checkin_with(kind, buf, kind.reset());
            }
        }
    }

    /// Drop a registration whose submission never happened.
    fn abandon(&self, uid: Uid) {
        let resolved = self.table.lock().resolve(uid);
        if let Ok((_callback, pins)) = resolved {
            self.release(pins);
        }
    }
}

impl CompletionHandler for Router {
    fn complete(&self, completion: Completion) {
        let Some(uid) = completion.user_data else {
            tracing::trace!(code = completion.code, "completion without uid ignored");
            return;
        };
        // Unknown uids are logged by the table.
        let resolved = self.table.lock().resolve(uid);
        let Ok((callback, pins)) = resolved else {
            return;
        };
        self.release(pins);

        let reply = if completion.code == codes::OK {
            Ok(completion.payload)
        } else {
            Err(CallError::from_code(completion.code))
        };
        if panic::catch_unwind(AssertUnwindSafe(move || callback(reply))).is_err() {
            tracing::error!(%uid, "completion callback panicked");
        }
    }
}

pub struct Session {
    surface: Arc<CallSurface>,
    dispatcher: EventLoopDispatcher<BoxedEventBase>,
    router: Arc<Router>,
    hosts: Mutex<Vec<(String, u16)>>,
    blocking_grace: Duration,
}

impl Session {
    pub fn new<F>(config: &ClientConfig, surface: Arc<CallSurface>, factory: F) -> Self
    where
        F: Fn() -> io::Result<BoxedEventBase> + Send + Sync + 'static,
    {
        let table = CorrelationTable::with_max_free(config.max_object_pool_size).with_prefilled(config.prefill());
        Self {
            surface,
            dispatcher: EventLoopDispatcher::new(config.dispatcher.clone(), factory),
            router: Arc::new(Router {
                table: Mutex::new(table),
                pool: Mutex::new(ResourcePool::with_capacity(config.pool_capacity)),
            }),
            hosts: Mutex::new(Vec::new()),
            blocking_grace: config.blocking_grace,
        }
    }

    pub fn dispatcher(&self) -> &EventLoopDispatcher<BoxedEventBase> {
        &self.dispatcher
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        self.dispatcher.lifecycle()
    }

    pub fn surface(&self) -> &Arc<CallSurface> {
        &self.surface
    }

    /// Calls registered and not yet completed.
    pub fn outstanding(&self) -> usize {
        self.router.table.lock().outstanding()
    }

    /// Idle pooled handles of `kind`.
    pub fn pooled_available(&self, kind: HandleKind) -> usize {
        self.router.pool.lock().available(&kind)
    }

    /// Check out a pooled handle, let `fill` write it, and pin it.
    pub fn pin_pooled<F>(&self, pins: &mut Pins, kind: HandleKind, fill: F)
    where
        F: FnOnce(&mut Vec<u8>),
    {
        let mut buf = self.router.pool.lock().checkout(kind, Vec::new);
        fill(&mut buf);
        pins.pooled(kind, buf);
    }

    /// Submit an async native call; `callback` runs on the loop thread
    /// when it completes.
    pub fn dispatch(
        &self,
        op: &'static str,
        pins: Pins,
        ints: Vec<i64>,
        timeout_ms: u32,
        callback: Callback,
    ) -> Result<Uid> {
        let func = self.surface.function(op);
        let frame = frame_for(&pins, ints).timeout_ms(timeout_ms);
        let uid = self.router.table.lock().register(callback, pins);
        let frame = frame.user_data(uid).handler(self.router.clone());

        if let Err(e) = self.dispatcher.submit_work(WorkItem::new(op, func, frame)) {
            self.router.abandon(uid);
            return Err(e);
        }
        tracing::trace!(%uid, op, "call submitted");
        Ok(uid)
    }

    /// Submit a call nobody waits on. `pins` live as long as the work item.
    pub fn fire(&self, op: &'static str, pins: Pins, ints: Vec<i64>) -> Result<()> {
        let frame = frame_for(&pins, ints);
        let func = self.surface.function(op);
        let bound: NativeFn = Arc::new(move |frame: &CallFrame| {
            let _pinned = &pins;
            func(frame)
        });
        self.dispatcher.submit_work(WorkItem::new(op, bound, frame))
    }

    /// Call a synchronous native function on the caller's thread.
    ///
    /// Only legal while the loop thread is not running.
    pub fn call_inline(&self, op: &'static str, pins: &Pins, ints: Vec<i64>) -> Result<i32> {
        let gate = Gate::require::<DispatcherStates>(DispatcherStates::INITIALIZED);
        self.lifecycle()
            .run(&gate, || Ok(self.surface.call(op, &frame_for(pins, ints))))
    }

    /// Call a stateless native function on the caller's thread, whatever
    /// the loop is doing. Returns the completion the function delivered
    /// while running, or its return code with no payload if it delivered
    /// none.
    pub fn call_direct(&self, op: &'static str, pins: Pins, ints: Vec<i64>) -> (i32, Payload) {
        let captured = Arc::new(Captured::default());
        let frame = frame_for(&pins, ints).handler(captured.clone());
        let code = self.surface.call(op, &frame);
        self.router.release(pins);

        let completion = captured.0.lock().take();
        match completion {
            Some(completion) => (completion.code, completion.payload),
            None => (code, Payload::None),
        }
    }

    /// Call a synchronous native function on the loop thread and wait
    /// for its return code. Runs as a control item, so a paused loop
    /// still serves it.
    pub fn call_on_loop(&self, op: &'static str, pins: Pins, ints: Vec<i64>, timeout_ms: u32) -> Result<i32> {
        let func = self.surface.function(op);
        if self.dispatcher.on_loop_thread() {
            return Ok(func(&frame_for(&pins, ints)));
        }

        let frame = frame_for(&pins, ints);
        let adapter = SyncAdapter::new();
        adapter.try_call(Some(self.blocking_wait(timeout_ms)), |done: Completer<i32>| {
            let done = Mutex::new(Some(done));
            let bound: NativeFn = Arc::new(move |frame: &CallFrame| {
                let _pinned = &pins;
                let code = func(frame);
                if let Some(done) = done.lock().take() {
                    done.complete(code);
                }
                // Reported through the completer, never to the dispatcher.
                codes::OK
            });
            self.dispatcher.submit_control(WorkItem::new(op, bound, frame))
        })
    }

    /// Call a synchronous native function from wherever the single-writer
    /// rule allows: inline before activation, on the loop thread after.
    pub fn call_serialized(&self, op: &'static str, pins: Pins, ints: Vec<i64>, timeout_ms: u32) -> Result<i32> {
        if self.dispatcher.state() == DispatcherStates::INITIALIZED {
            self.call_inline(op, &pins, ints)
        } else {
            self.call_on_loop(op, pins, ints, timeout_ms)
        }
    }

    /// Upper bound for a blocking wait on a call with `timeout_ms`.
    pub fn blocking_wait(&self, timeout_ms: u32) -> Duration {
        Duration::from_millis(timeout_ms as u64) + self.blocking_grace
    }

    /// Record a host. Returns false if it was already known.
    pub fn remember_host(&self, host: &str, port: u16) -> bool {
        let mut hosts = self.hosts.lock();
        if hosts.iter().any(|(h, p)| h == host && *p == port) {
            return false;
        }
        hosts.push((host.to_string(), port));
        true
    }

    pub fn hosts(&self) -> Vec<(String, u16)> {
        self.hosts.lock().clone()
    }

    pub fn first_host(&self) -> Option<(String, u16)> {
        self.hosts.lock().first().cloned()
    }

    pub fn forget_hosts(&self) {
        self.hosts.lock().clear();
    }
}

fn frame_for(pins: &Pins, ints: Vec<i64>) -> CallFrame {
    let mut frame = CallFrame::new();
    frame.buffers = pins.refs().to_vec();
    frame.ints = ints;
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pins_keep_argument_order() {
        let mut pins = Pins::new();
        pins.bytes("ns").bytes(&b"set"[..]);
        pins.pooled(HandleKind::KeyObject, b"key".to_vec());
        let views: Vec<&[u8]> = pins.refs().iter().map(|r| unsafe { r.as_slice() }).collect();
        assert_eq!(views, vec![&b"ns"[..], &b"set"[..], &b"key"[..]]);
    }

    #[test]
    fn test_router_releases_pooled_handles_before_callback() {
        let router = Arc::new(Router {
            table: Mutex::new(CorrelationTable::new()),
            pool: Mutex::new(ResourcePool::with_capacity(4)),
        });
        let mut pins = Pins::new();
        pins.pooled(HandleKind::WriteParameters, vec![0xaa; 3]);
        pins.pooled(HandleKind::KeyObject, b"user".to_vec());

        let seen = Arc::new(Mutex::new(None));
        let (r, s) = (router.clone(), seen.clone());
        let uid = router.table.lock().register(
            Box::new(move |reply: Reply| {
                let pooled = r.pool.lock().available(&HandleKind::KeyObject);
                *s.lock() = Some((reply, pooled));
            }),
            pins,
        );

        router.complete(Completion {
            user_data: Some(uid),
            code: 2,
            payload: Payload::None,
        });

        let (reply, pooled) = seen.lock().take().unwrap();
        assert_eq!(reply.unwrap_err().code, 2);
        assert_eq!(pooled, 1, "handles are back before the callback runs");

        let mut pool = router.pool.lock();
        assert!(pool.checkout(HandleKind::KeyObject, || unreachable!()).is_empty());
        let params = pool.checkout(HandleKind::WriteParameters, || unreachable!());
        assert_eq!(WriteParameters::decode(&params), Some(WriteParameters::default()));
    }

    #[test]
    fn test_captured_keeps_last_completion() {
        let captured = Captured::default();
        captured.complete(Completion {
            user_data: None,
            code: 0,
            payload: Payload::Response(vec![7; 3]),
        });
        let got = captured.0.lock().take().unwrap();
        assert_eq!(got.payload, Payload::Response(vec![7; 3]));
        assert!(captured.0.lock().is_none());
    }

    #[test]
    fn test_router_survives_panicking_callback() {
        let router = Router {
            table: Mutex::new(CorrelationTable::new()),
            pool: Mutex::new(ResourcePool::new()),
        };
        let uid = router.table.lock().register(Box::new(|_| panic!("user bug")), Pins::new());
        router.complete(Completion {
            user_data: Some(uid),
            code: 0,
            payload: Payload::None,
        });
        assert_eq!(router.table.lock().outstanding(), 0);
    }
}
