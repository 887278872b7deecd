//! The event-loop dispatcher.
//!
//! Owns the event base and the only thread allowed to touch it. Caller
//! threads hand work over through a lock-free queue and a notifier; the
//! loop thread runs:
//!
//! ```text
//! while running {
//!     1. Drain the control queue, then the work queue (unless paused):
//!          execute item → 0      ok
//!                       → -3     throttled: requeue at back, end pass
//!                       → -1     client error: log, apply policy, end pass
//!                       → other  log, keep draining
//!                       → panic  log, fail the frame with -1, keep draining
//!     2. Step the event base (bounded by idle_wait); completions run here
//!     3. Fatal step → log, count, back off one idle_wait
//! }
//! drain the control queue one last time
//! ```
//!
//! Control items are the client's own synchronous calls (cluster teardown,
//! log level). A caller blocks on them, so they are not held by `pause`.

use crate::config::{DispatcherConfig, SubmitFailurePolicy};
use crate::work::WorkItem;

use crossbeam_queue::SegQueue;
use evbridge_core::codes::{self, SubmitCode};
use evbridge_core::error::{CoreError, Result};
use evbridge_core::event::{EventBase, Notifier, StepStatus};
use evbridge_core::frame::Payload;
use evbridge_core::lifecycle::{Gate, Lifecycle, StateType, StateValue};
use parking_lot::Mutex;

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// State type tracked by the dispatcher's lifecycle.
pub enum DispatcherStates {}

impl StateType for DispatcherStates {
    const NAME: &'static str = "DispatcherStates";
}

impl DispatcherStates {
    pub const UNINITIALIZED: StateValue = StateValue::UNINITIALIZED;
    pub const INITIALIZED: StateValue = StateValue(1);
    pub const RUNNING: StateValue = StateValue(2);
}

#[derive(Default)]
struct Counters {
    executed: AtomicU64,
    throttled: AtomicU64,
    client_errors: AtomicU64,
    other_codes: AtomicU64,
    panics: AtomicU64,
    fatal_steps: AtomicU64,
}

/// Snapshot of the loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    /// Native calls made, retries included.
    pub executed: u64,
    pub throttled: u64,
    pub client_errors: u64,
    /// Submissions that returned an unrecognized code.
    pub other_codes: u64,
    /// Items whose native function panicked.
    pub panics: u64,
    pub fatal_steps: u64,
}

/// State shared between the handle and the loop thread.
struct Shared {
    queue: SegQueue<WorkItem>,
    control: SegQueue<WorkItem>,
    running: AtomicBool,
    paused: AtomicBool,
    counters: Counters,
    idle_wait: Duration,
    policy: SubmitFailurePolicy,
}

pub type EventBaseFactory<E> = Box<dyn Fn() -> io::Result<E> + Send + Sync>;

pub struct EventLoopDispatcher<E: EventBase> {
    shared: Arc<Shared>,
    lifecycle: Arc<Lifecycle>,
    factory: EventBaseFactory<E>,
    /// Empty while the loop thread holds the base.
    base: Arc<Mutex<Option<E>>>,
    notifier: Mutex<Option<Arc<dyn Notifier>>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
    thread_name: String,
}

impl<E: EventBase> EventLoopDispatcher<E> {
    pub fn new<F>(config: DispatcherConfig, factory: F) -> Self
    where
        F: Fn() -> io::Result<E> + Send + Sync + 'static,
    {
        Self::with_lifecycle(config, Arc::new(Lifecycle::new()), factory)
    }

    /// Dispatcher whose state lives in a lifecycle shared with its owner,
    /// so the owner can stack its own gates on the dispatcher's state.
    pub fn with_lifecycle<F>(config: DispatcherConfig, lifecycle: Arc<Lifecycle>, factory: F) -> Self
    where
        F: Fn() -> io::Result<E> + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                queue: SegQueue::new(),
                control: SegQueue::new(),
                running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                counters: Counters::default(),
                idle_wait: config.idle_wait,
                policy: config.submit_failure_policy,
            }),
            lifecycle,
            factory: Box::new(factory),
            base: Arc::new(Mutex::new(None)),
            notifier: Mutex::new(None),
            thread: Mutex::new(None),
            thread_name: config.thread_name,
        }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn state(&self) -> StateValue {
        self.lifecycle.get::<DispatcherStates>()
    }

    /// Create the event base and make it notifiable.
    pub fn setup(&self) -> Result<()> {
        let gate = Gate::define::<DispatcherStates>(
            DispatcherStates::UNINITIALIZED,
            Some(DispatcherStates::INITIALIZED),
        );
        self.lifecycle.run(&gate, || {
            let mut base = (self.factory)().map_err(CoreError::EventBase)?;
            let notifier = base.make_notifiable().map_err(CoreError::EventBase)?;
            *self.base.lock() = Some(base);
            *self.notifier.lock() = Some(notifier);
            tracing::debug!("event base created");
            Ok(())
        })
    }

    /// Start the loop thread.
    pub fn activate(&self) -> Result<()> {
        let gate = Gate::define::<DispatcherStates>(
            DispatcherStates::INITIALIZED,
            Some(DispatcherStates::INITIALIZED | DispatcherStates::RUNNING),
        );
        self.lifecycle.run(&gate, || {
            // A loop stopped from its own thread may not have exited yet.
            self.reap();

            self.shared.paused.store(false, Ordering::Release);
            self.shared.running.store(true, Ordering::Release);

            let shared = self.shared.clone();
            let slot = self.base.clone();
            let spawned = thread::Builder::new()
                .name(self.thread_name.clone())
                .spawn(move || run_loop(shared, slot));

            match spawned {
                Ok(handle) => {
                    *self.thread.lock() = Some(handle);
                    tracing::info!(thread = %self.thread_name, "event loop activated");
                    Ok(())
                }
                Err(e) => {
                    self.shared.running.store(false, Ordering::Release);
                    Err(CoreError::Spawn(e))
                }
            }
        })
    }

    /// Queue `item` for the loop thread and wake it.
    ///
    /// Never executes inline, even when called from the loop thread.
    pub fn submit_work(&self, item: WorkItem) -> Result<()> {
        let gate = Gate::require::<DispatcherStates>(DispatcherStates::INITIALIZED | DispatcherStates::RUNNING);
        self.lifecycle.run(&gate, || {
            self.shared.queue.push(item);
            self.wake();
            Ok(())
        })
    }

    /// Queue a control item. It runs ahead of queued work and also while
    /// the dispatcher is paused; one still queued at deactivation runs
    /// before the loop thread exits.
    pub fn submit_control(&self, item: WorkItem) -> Result<()> {
        let gate = Gate::require::<DispatcherStates>(DispatcherStates::INITIALIZED | DispatcherStates::RUNNING);
        self.lifecycle.run(&gate, || {
            self.shared.control.push(item);
            self.wake();
            Ok(())
        })
    }

    /// Stop draining the work queue. Submissions are still accepted.
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
        tracing::debug!("dispatcher paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
        self.wake();
        tracing::debug!("dispatcher resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Stop the loop thread and wait for it, unless called from it.
    ///
    /// Queued work items stay in the queue unexecuted.
    pub fn deactivate(&self) -> Result<()> {
        let gate = Gate::define::<DispatcherStates>(
            DispatcherStates::INITIALIZED | DispatcherStates::RUNNING,
            Some(DispatcherStates::INITIALIZED),
        );
        self.lifecycle.run(&gate, || {
            self.shared.running.store(false, Ordering::Release);
            self.wake();
            self.reap();
            tracing::info!(queued = self.shared.queue.len(), "event loop deactivated");
            Ok(())
        })
    }

    /// Destroy the event base.
    pub fn teardown(&self) -> Result<()> {
        let gate = Gate::define::<DispatcherStates>(
            DispatcherStates::INITIALIZED,
            Some(DispatcherStates::UNINITIALIZED),
        );
        self.lifecycle.run(&gate, || {
            self.reap();
            *self.notifier.lock() = None;
            if self.base.lock().take().is_none() {
                tracing::warn!("teardown without an event base");
            }
            tracing::debug!("event base destroyed");
            Ok(())
        })
    }

    /// Items waiting in either queue.
    pub fn queued(&self) -> usize {
        self.shared.queue.len() + self.shared.control.len()
    }

    pub fn stats(&self) -> DispatcherStats {
        let c = &self.shared.counters;
        DispatcherStats {
            executed: c.executed.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
            client_errors: c.client_errors.load(Ordering::Relaxed),
            other_codes: c.other_codes.load(Ordering::Relaxed),
            panics: c.panics.load(Ordering::Relaxed),
            fatal_steps: c.fatal_steps.load(Ordering::Relaxed),
        }
    }

    /// Whether the caller is running on the loop thread.
    pub fn on_loop_thread(&self) -> bool {
        self.thread
            .lock()
            .as_ref()
            .map_or(false, |h| h.thread().id() == thread::current().id())
    }

    fn wake(&self) {
        let notifier = self.notifier.lock().clone();
        if let Some(notifier) = notifier {
            if let Err(e) = notifier.notify() {
                tracing::warn!(error = %e, "event base wakeup failed");
            }
        }
    }

    /// Join a finished or stopping loop thread.
    fn reap(&self) {
        let handle = {
            let mut slot = self.thread.lock();
            if slot.as_ref().map_or(false, |h| h.thread().id() == thread::current().id()) {
                return;
            }
            slot.take()
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("event loop thread panicked");
            }
        }
    }
}

impl<E: EventBase> Drop for EventLoopDispatcher<E> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.wake();
        self.reap();
    }
}

/// The loop thread body.
fn run_loop<E: EventBase>(shared: Arc<Shared>, slot: Arc<Mutex<Option<E>>>) {
    let Some(mut base) = slot.lock().take() else {
        tracing::error!("event loop started without an event base");
        return;
    };
    tracing::debug!("event loop started");

    while shared.running.load(Ordering::Acquire) {
        // ── Step 1: Drain the work queue ──
        drain(&shared);

        // ── Step 2: Advance the event base ──
        if let StepStatus::Fatal(code) = base.step(shared.idle_wait) {
            // ── Step 3: Fatal step, back off and keep going ──
            shared.counters.fatal_steps.fetch_add(1, Ordering::Relaxed);
            tracing::error!(code, "event loop terminated abnormally");
            thread::sleep(shared.idle_wait);
        }
    }

    drain_control(&shared);
    *slot.lock() = Some(base);
    tracing::debug!("event loop stopped");
}

fn drain(shared: &Shared) {
    drain_control(shared);
    while !shared.paused.load(Ordering::Acquire) {
        let Some(item) = shared.queue.pop() else {
            break;
        };
        if !run_item(shared, &shared.queue, item) {
            break;
        }
    }
}

fn drain_control(shared: &Shared) {
    while let Some(item) = shared.control.pop() {
        if !run_item(shared, &shared.control, item) {
            break;
        }
    }
}

/// Execute one item popped from `queue`. Returns false when the pass
/// should end.
fn run_item(shared: &Shared, queue: &SegQueue<WorkItem>, mut item: WorkItem) -> bool {
    let c = &shared.counters;
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| item.execute()));
    c.executed.fetch_add(1, Ordering::Relaxed);

    let code = match outcome {
        Ok(code) => code,
        Err(_) => {
            c.panics.fetch_add(1, Ordering::Relaxed);
            tracing::error!(op = item.name(), "native call panicked");
            item.frame().complete(codes::FAIL_CLIENT_ERROR, Payload::None);
            return true;
        }
    };

    match SubmitCode::classify(code) {
        SubmitCode::Accepted => true,
        SubmitCode::Throttled => {
            c.throttled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(op = item.name(), attempts = item.attempts(), "submission throttled, requeued");
            queue.push(item);
            false
        }
        SubmitCode::ClientError => {
            c.client_errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(op = item.name(), code, "unable to generate network request on event loop");
            match shared.policy {
                SubmitFailurePolicy::Retry => queue.push(item),
                SubmitFailurePolicy::Fail => item.frame().complete(code, Payload::None),
            }
            false
        }
        SubmitCode::Other(code) => {
            c.other_codes.fetch_add(1, Ordering::Relaxed);
            tracing::info!(op = item.name(), code, "unrecognized submission code");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evbridge_core::correlation::CorrelationTable;
    use evbridge_core::frame::{BufferRef, CallFrame, Completion, CompletionHandler};
    use evbridge_core::Uid;
    use std::sync::atomic::{AtomicI32, AtomicUsize};
    use std::time::Instant;

    struct NoopNotifier;

    impl Notifier for NoopNotifier {
        fn notify(&self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Sleeps instead of polling; optionally fails its first steps.
    struct TestBase {
        fatal_steps: usize,
        steps: Arc<AtomicUsize>,
    }

    impl EventBase for TestBase {
        fn make_notifiable(&mut self) -> io::Result<Arc<dyn Notifier>> {
            Ok(Arc::new(NoopNotifier))
        }

        fn step(&mut self, timeout: Duration) -> StepStatus {
            let n = self.steps.fetch_add(1, Ordering::SeqCst);
            if n < self.fatal_steps {
                return StepStatus::Fatal(-1);
            }
            thread::sleep(timeout.min(Duration::from_micros(200)));
            StepStatus::Idle
        }
    }

    fn config() -> DispatcherConfig {
        DispatcherConfig::new()
            .idle_wait(Duration::from_micros(200))
            .thread_name("evbridge-test")
    }

    fn dispatcher_with(config: DispatcherConfig, fatal_steps: usize) -> EventLoopDispatcher<TestBase> {
        EventLoopDispatcher::new(config, move || {
            Ok(TestBase {
                fatal_steps,
                steps: Arc::new(AtomicUsize::new(0)),
            })
        })
    }

    fn running() -> EventLoopDispatcher<TestBase> {
        let d = dispatcher_with(config(), 0);
        d.setup().unwrap();
        d.activate().unwrap();
        d
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> WorkItem {
        let log = log.clone();
        WorkItem::from_fn(name, move |_| {
            log.lock().push(name);
            0
        })
    }

    #[test]
    fn test_gate_order() {
        let d = dispatcher_with(config(), 0);
        assert!(matches!(
            d.submit_work(WorkItem::from_fn("early", |_| 0)),
            Err(CoreError::OrderViolation(_))
        ));
        assert!(d.activate().is_err());
        assert!(d.teardown().is_err());

        d.setup().unwrap();
        assert_eq!(d.state(), DispatcherStates::INITIALIZED);
        assert!(d.setup().is_err());

        d.activate().unwrap();
        assert_eq!(d.state(), DispatcherStates::INITIALIZED | DispatcherStates::RUNNING);
        assert!(d.activate().is_err());
        assert!(d.teardown().is_err(), "teardown requires a deactivated loop");

        d.deactivate().unwrap();
        assert_eq!(d.state(), DispatcherStates::INITIALIZED);
        d.teardown().unwrap();
        assert_eq!(d.state(), DispatcherStates::UNINITIALIZED);
    }

    #[test]
    fn test_submit_executes_on_loop_thread_in_order() {
        let d = running();
        let log = Arc::new(Mutex::new(Vec::new()));
        let names = Arc::new(Mutex::new(Vec::new()));
        for name in ["a", "b", "c"] {
            let names = names.clone();
            let log = log.clone();
            d.submit_work(WorkItem::from_fn(name, move |_| {
                names.lock().push(thread::current().name().map(str::to_string));
                log.lock().push(name);
                0
            }))
            .unwrap();
        }
        assert!(wait_until(|| log.lock().len() == 3));
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert!(names.lock().iter().all(|n| n.as_deref() == Some("evbridge-test")));
        assert_eq!(d.stats().executed, 3);
    }

    #[test]
    fn test_throttled_item_goes_to_back() {
        let d = running();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.pause();

        d.submit_work(recorder(&log, "A")).unwrap();
        let throttle_once = Arc::new(AtomicBool::new(true));
        let l = log.clone();
        d.submit_work(WorkItem::from_fn("B", move |_| {
            l.lock().push("B");
            if throttle_once.swap(false, Ordering::SeqCst) {
                evbridge_core::codes::FAIL_THROTTLED
            } else {
                0
            }
        }))
        .unwrap();
        d.submit_work(recorder(&log, "C")).unwrap();

        d.resume();
        assert!(wait_until(|| log.lock().len() == 4));
        assert_eq!(*log.lock(), vec!["A", "B", "C", "B"]);
        assert_eq!(d.stats().throttled, 1);
        assert_eq!(d.queued(), 0);
    }

    #[test]
    fn test_client_error_retry_policy() {
        let d = running();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        d.submit_work(WorkItem::from_fn("flaky", move |_| {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                evbridge_core::codes::FAIL_CLIENT_ERROR
            } else {
                0
            }
        }))
        .unwrap();

        assert!(wait_until(|| calls.load(Ordering::SeqCst) == 2));
        assert_eq!(d.stats().client_errors, 1);
    }

    struct CodeCapture(AtomicI32);

    impl CompletionHandler for CodeCapture {
        fn complete(&self, completion: Completion) {
            self.0.store(completion.code, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_client_error_fail_policy_completes_frame() {
        let d = dispatcher_with(config().submit_failure_policy(SubmitFailurePolicy::Fail), 0);
        d.setup().unwrap();
        d.activate().unwrap();

        let capture = Arc::new(CodeCapture(AtomicI32::new(0)));
        let frame = CallFrame::new().user_data(Uid::FIRST).handler(capture.clone());
        let item = WorkItem::new(
            "doomed",
            Arc::new(|_: &CallFrame| evbridge_core::codes::FAIL_CLIENT_ERROR),
            frame,
        );
        d.submit_work(item).unwrap();

        assert!(wait_until(|| capture.0.load(Ordering::SeqCst) == -1));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(d.stats().executed, 1, "failed item is not retried");
        assert_eq!(d.queued(), 0);
    }

    #[test]
    fn test_unknown_code_keeps_draining() {
        let d = running();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.pause();
        d.submit_work(WorkItem::from_fn("odd", |_| 42)).unwrap();
        d.submit_work(recorder(&log, "next")).unwrap();
        d.resume();

        assert!(wait_until(|| log.lock().len() == 1));
        assert_eq!(d.stats().other_codes, 1);
    }

    #[test]
    fn test_pause_holds_queue() {
        let d = running();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.pause();
        assert!(d.is_paused());
        d.submit_work(recorder(&log, "held")).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(log.lock().is_empty());
        assert_eq!(d.queued(), 1);

        d.resume();
        assert!(wait_until(|| log.lock().len() == 1));
    }

    #[test]
    fn test_panicking_item_does_not_stop_the_loop() {
        let d = running();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.pause();
        let capture = Arc::new(CodeCapture(AtomicI32::new(0)));
        let frame = CallFrame::new().user_data(Uid::FIRST).handler(capture.clone());
        d.submit_work(WorkItem::new("boom", Arc::new(|_: &CallFrame| -> i32 { panic!("native bug") }), frame))
            .unwrap();
        d.submit_work(WorkItem::from_fn("boom-again", |_| panic!("native bug"))).unwrap();
        d.submit_work(recorder(&log, "after-panic")).unwrap();
        d.resume();

        assert!(wait_until(|| log.lock().len() == 1));
        assert_eq!(capture.0.load(Ordering::SeqCst), evbridge_core::codes::FAIL_CLIENT_ERROR);
        assert_eq!(d.stats().panics, 2);
        assert_eq!(d.stats().executed, 3);
        assert_eq!(d.queued(), 0);
        assert_eq!(d.state(), DispatcherStates::INITIALIZED | DispatcherStates::RUNNING);
        d.deactivate().unwrap();
    }

    #[test]
    fn test_control_items_bypass_pause() {
        let d = running();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.pause();
        d.submit_work(recorder(&log, "work")).unwrap();
        d.submit_control(recorder(&log, "control")).unwrap();

        assert!(wait_until(|| log.lock().len() == 1));
        assert_eq!(*log.lock(), vec!["control"]);
        assert_eq!(d.queued(), 1, "work stays held");

        d.resume();
        assert!(wait_until(|| log.lock().len() == 2));
        assert_eq!(*log.lock(), vec!["control", "work"]);
    }

    #[test]
    fn test_control_item_runs_before_loop_exits() {
        let d = running();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.pause();
        let l = log.clone();
        d.submit_control(WorkItem::from_fn("slow", move |_| {
            thread::sleep(Duration::from_millis(20));
            l.lock().push("slow");
            0
        }))
        .unwrap();
        d.submit_control(recorder(&log, "behind-slow")).unwrap();
        d.deactivate().unwrap();

        assert_eq!(*log.lock(), vec!["slow", "behind-slow"]);
        assert_eq!(d.queued(), 0);
        assert!(matches!(
            d.submit_control(recorder(&log, "late")),
            Err(CoreError::OrderViolation(_))
        ));
    }

    #[test]
    fn test_fatal_steps_counted_and_loop_continues() {
        let d = dispatcher_with(config(), 3);
        d.setup().unwrap();
        d.activate().unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        d.submit_work(recorder(&log, "after-fatal")).unwrap();
        assert!(wait_until(|| d.stats().fatal_steps == 3 && log.lock().len() == 1));
    }

    #[test]
    fn test_deactivate_abandons_queue_then_reactivate() {
        let d = running();
        let log = Arc::new(Mutex::new(Vec::new()));
        d.pause();
        d.submit_work(recorder(&log, "late")).unwrap();
        d.deactivate().unwrap();

        assert_eq!(d.queued(), 1);
        assert!(log.lock().is_empty());
        assert!(
            d.submit_work(recorder(&log, "rejected")).is_err(),
            "submission requires a running loop"
        );

        d.activate().unwrap();
        assert!(!d.is_paused(), "activate clears pause");
        assert!(wait_until(|| log.lock().len() == 1));
        assert_eq!(*log.lock(), vec!["late"]);
    }

    type Callback = Box<dyn FnOnce(i32, Payload) + Send>;

    struct Router {
        table: Mutex<CorrelationTable<Callback, Box<[u8]>>>,
    }

    impl CompletionHandler for Router {
        fn complete(&self, completion: Completion) {
            let Some(uid) = completion.user_data else { return };
            let resolved = self.table.lock().resolve(uid);
            if let Ok((callback, _pinned)) = resolved {
                callback(completion.code, completion.payload);
            }
        }
    }

    #[test]
    fn test_register_submit_complete_reuses_uid() {
        let d = running();
        let router = Arc::new(Router {
            table: Mutex::new(CorrelationTable::with_max_free(Some(1))),
        });
        let echo: evbridge_core::frame::NativeFn = Arc::new(|frame: &CallFrame| {
            let bytes = unsafe { frame.buffers[0].as_slice() }.to_vec();
            frame.complete(0, Payload::Response(bytes));
            0
        });

        let (tx, rx) = std::sync::mpsc::channel();
        let mut uids = Vec::new();
        for word in ["alpha", "beta"] {
            let pinned: Box<[u8]> = word.as_bytes().to_vec().into_boxed_slice();
            let view = BufferRef::new(&pinned);
            let tx = tx.clone();
            let uid = router.table.lock().register(
                Box::new(move |code, payload| {
                    let on_loop = thread::current().name() == Some("evbridge-test");
                    tx.send((code, payload, on_loop)).unwrap();
                }),
                pinned,
            );
            uids.push(uid);
            let frame = CallFrame::new().user_data(uid).buffer(view).handler(router.clone());
            d.submit_work(WorkItem::new("echo", echo.clone(), frame)).unwrap();

            let (code, payload, on_loop) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(code, 0);
            assert_eq!(payload, Payload::Response(word.as_bytes().to_vec()));
            assert!(on_loop);
        }

        assert_eq!(uids[0], uids[1], "resolved uid is reissued");
        assert_eq!(router.table.lock().outstanding(), 0);
        assert_eq!(router.table.lock().free_uids(), 1);
    }
}
