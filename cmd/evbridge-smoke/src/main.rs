//! evbridge End-to-End Smoke Test
//!
//! Tests the full stack against the in-memory loopback backend:
//!   Part A: Lifecycle gates: dispatcher ordering, OrderViolation shape
//!   Part B: Dispatcher: in-order drain, throttle requeue, pause/resume
//!   Part C: Client (blocking): put, get, select, generation, remove, digest
//!   Part D: Client (async): fan-out, loop-thread callbacks, handle reuse
//!   Part E: Info and shutdown ordering
//!
//! Run: ./target/release/evbridge-smoke
//! (RUST_LOG=evbridge=debug for dispatcher traces)

use evbridge_client::{
    BackendVersion, Bin, Client, ClientConfig, CoreError, Digest, HandleKind, LibraryKind, RecordKey,
    WriteParameters,
};
use evbridge_core::codes;
use evbridge_executor::{DispatcherConfig, DispatcherStates, EventLoopDispatcher, SyncAdapter, WorkItem};
use evbridge_module::loopback::{digest_of, LoopbackBackend};
use evbridge_module::{DefaultEventBase, ParkedEventBase};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

// ── Test harness ──

struct TestRunner {
    total: usize,
    passed: usize,
    failed: usize,
}

const LINE: &str = "────────────────────────────────────────────────────────────";

impl TestRunner {
    fn new() -> Self {
        Self { total: 0, passed: 0, failed: 0 }
    }

    fn section(&self, name: &str) {
        println!("\n{}", LINE);
        println!("  {}", name);
        println!("{}", LINE);
    }

    fn pass(&mut self, name: &str) {
        self.total += 1;
        self.passed += 1;
        println!("  [{:2}] {:<52} PASS", self.total, name);
    }

    fn fail(&mut self, name: &str, reason: &str) {
        self.total += 1;
        self.failed += 1;
        println!("  [{:2}] {:<52} FAIL: {}", self.total, name, reason);
    }

    fn check(&mut self, name: &str, ok: bool, reason: &str) {
        if ok { self.pass(name); } else { self.fail(name, reason); }
    }

    fn summary(&self) {
        println!("\n{}", LINE);
        println!(
            "  Total: {}  Passed: {}  Failed: {}",
            self.total, self.passed, self.failed
        );
        println!("{}", LINE);
    }
}

fn dispatcher_config() -> DispatcherConfig {
    DispatcherConfig::new()
        .idle_wait(Duration::from_micros(500))
        .thread_name("evbridge-smoke")
}

/// Client on the loopback backend with deferred completion delivery.
fn loopback_client() -> Result<(Client, Arc<LoopbackBackend>), CoreError> {
    let backend = LoopbackBackend::new();
    let base = ParkedEventBase::new().map_err(CoreError::EventBase)?;
    backend.deliver_via(base.defer_handle());
    let client = Client::connect_with_base(
        ClientConfig::from_env().dispatcher(dispatcher_config()),
        &backend.library(),
        BackendVersion::V2,
        LibraryKind::NonBlocking,
        Box::new(base),
    )?;
    Ok((client, backend))
}

// ════════════════════════════════════════════════════════════
// Part A: Lifecycle gates
// ════════════════════════════════════════════════════════════

fn test_lifecycle(t: &mut TestRunner) {
    t.section("Part A: Lifecycle gates");

    let d = EventLoopDispatcher::new(dispatcher_config(), ParkedEventBase::new);

    // A1: submit before setup
    let early = d.submit_work(WorkItem::from_fn("early", |_| codes::OK));
    t.check("submit before setup -> OrderViolation",
        matches!(early, Err(CoreError::OrderViolation(_))), &format!("{:?}", early));

    // A2: activate before setup
    match d.activate() {
        Err(CoreError::OrderViolation(v)) => {
            t.check("activate before setup names DispatcherStates",
                v.state_type == "DispatcherStates" && v.required == 1 && v.actual == 0,
                &format!("{}", v));
        }
        other => t.fail("activate before setup -> OrderViolation", &format!("{:?}", other)),
    }

    // A3: setup, then setup again
    t.check("setup", d.setup().is_ok(), "setup failed");
    t.check("second setup rejected", d.setup().is_err(), "setup ran twice");

    // A4: activate, state is INITIALIZED | RUNNING
    t.check("activate", d.activate().is_ok(), "activate failed");
    t.check("state == INITIALIZED | RUNNING",
        d.state() == DispatcherStates::INITIALIZED | DispatcherStates::RUNNING,
        &format!("state {}", d.state()));

    // A5: teardown while running
    t.check("teardown while running rejected", d.teardown().is_err(), "teardown ran");

    t.check("deactivate", d.deactivate().is_ok(), "deactivate failed");
    t.check("teardown", d.teardown().is_ok(), "teardown failed");
    t.check("state back to UNINITIALIZED", d.state() == DispatcherStates::UNINITIALIZED,
        &format!("state {}", d.state()));
}

// ════════════════════════════════════════════════════════════
// Part B: Dispatcher
// ════════════════════════════════════════════════════════════

fn test_dispatcher(t: &mut TestRunner) {
    t.section("Part B: Dispatcher");

    let d = EventLoopDispatcher::new(dispatcher_config(), DefaultEventBase::new);
    if let Err(e) = d.setup().and_then(|_| d.activate()) {
        t.fail("start dispatcher", &e.to_string());
        return;
    }

    // B1: items run in submission order on the loop thread
    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..16usize {
        let seen = seen.clone();
        let _ = d.submit_work(WorkItem::from_fn("order", move |_| {
            let on_loop = std::thread::current().name() == Some("evbridge-smoke");
            seen.lock().unwrap().push((i, on_loop));
            codes::OK
        }));
    }
    let order_ok = wait_until(|| seen.lock().unwrap().len() == 16);
    let seen = seen.lock().unwrap().clone();
    t.check("16 items drained in order",
        order_ok && seen.iter().enumerate().all(|(n, (i, _))| n == *i),
        &format!("{:?}", seen));
    t.check("items ran on the loop thread", seen.iter().all(|(_, on_loop)| *on_loop), "wrong thread");

    // B2: a throttled item is requeued and retried
    let tries = Arc::new(AtomicUsize::new(0));
    let tr = tries.clone();
    let _ = d.submit_work(WorkItem::from_fn("throttled", move |_| {
        if tr.fetch_add(1, Ordering::SeqCst) < 2 { codes::FAIL_THROTTLED } else { codes::OK }
    }));
    t.check("throttled item retried until accepted",
        wait_until(|| tries.load(Ordering::SeqCst) == 3), &format!("tries {}", tries.load(Ordering::SeqCst)));
    t.check("stats.throttled == 2", d.stats().throttled == 2, &format!("{:?}", d.stats()));

    // B3: pause holds the queue, resume drains it
    d.pause();
    let ran = Arc::new(AtomicUsize::new(0));
    let r = ran.clone();
    let _ = d.submit_work(WorkItem::from_fn("held", move |_| {
        r.fetch_add(1, Ordering::SeqCst);
        codes::OK
    }));
    std::thread::sleep(Duration::from_millis(20));
    t.check("paused loop holds the queue", ran.load(Ordering::SeqCst) == 0 && d.queued() == 1,
        &format!("queued {}", d.queued()));
    d.resume();
    t.check("resume drains the queue", wait_until(|| ran.load(Ordering::SeqCst) == 1), "item never ran");

    // B4: blocking wrapper over a callback-style op
    let double = SyncAdapter::wrap(|done: evbridge_executor::Completer<(i64,)>, x: i64| done.complete((x * 2,)));
    t.check("SyncAdapter::wrap round trip", double.call(21) == (42,), "wrong result");

    let _ = d.deactivate();
    let _ = d.teardown();
}

// ════════════════════════════════════════════════════════════
// Part C: Client, blocking operations
// ════════════════════════════════════════════════════════════

fn test_blocking(t: &mut TestRunner, client: &Client, backend: &LoopbackBackend) {
    t.section("Part C: Client (blocking)");
    let key = RecordKey::new("test", "demo", "smoke-1");
    let bins = vec![Bin::new("name", b"ada".to_vec()), Bin::new("lang", b"rust".to_vec())];

    // C1: put
    match client.put_key_blocking(&key, &bins, None) {
        Ok(Ok(r)) => t.check("put -> generation 1", r.generation == 1, &format!("gen {}", r.generation)),
        other => t.fail("put", &format!("{:?}", other)),
    }

    // C2: get
    match client.get_key_blocking(&key) {
        Ok(Ok(r)) => t.check("get returns both bins", r.bins == bins, &format!("{:?}", r.bins)),
        other => t.fail("get", &format!("{:?}", other)),
    }

    // C3: select
    match client.select_key_blocking(&key, &["lang"]) {
        Ok(Ok(r)) => t.check("select returns one bin",
            r.bins == vec![Bin::new("lang", b"rust".to_vec())], &format!("{:?}", r.bins)),
        other => t.fail("select", &format!("{:?}", other)),
    }

    // C4: generation-checked write
    let stale = WriteParameters { use_generation: true, generation: 9, ..Default::default() };
    match client.put_key_blocking(&key, &bins, Some(stale)) {
        Ok(Err(e)) => t.check("stale generation rejected", e.code == 3, &e.message),
        other => t.fail("stale generation rejected", &format!("{:?}", other)),
    }

    // C5: digest read
    let digest = Digest(digest_of(b"demo", b"smoke-1"));
    let local = client.calculate_digest("demo", b"smoke-1");
    t.check("calculate_digest matches backend", matches!(local, Ok(d) if d == digest), &format!("{:?}", local));
    match client.get_digest_blocking("test", &digest) {
        Ok(Ok(r)) => t.check("get by digest", r.bins == bins, &format!("{:?}", r.bins)),
        other => t.fail("get by digest", &format!("{:?}", other)),
    }

    // C6: remove, then get -> not found
    let removed = client.remove_key_blocking(&key, None);
    t.check("remove", matches!(removed, Ok(Ok(_))), &format!("{:?}", removed));
    match client.get_key_blocking(&key) {
        Ok(Err(e)) => t.check("get after remove -> NOTFOUND",
            e.code == 2 && e.message.contains("EV2CITRUSLEAF_FAIL_NOTFOUND"), &e.message),
        other => t.fail("get after remove -> NOTFOUND", &format!("{:?}", other)),
    }

    // C7: empty put rejected synchronously
    let empty = client.put_key(&key, &[], None, |_| {});
    t.check("put with no bins -> InvalidArgument",
        matches!(empty, Err(CoreError::InvalidArgument(_))), &format!("{:?}", empty));
    t.check("backend holds no records", backend.records() == 0, &format!("{}", backend.records()));
}

// ════════════════════════════════════════════════════════════
// Part D: Client, async operations
// ════════════════════════════════════════════════════════════

fn test_async(t: &mut TestRunner, client: &Client, backend: &LoopbackBackend) {
    t.section("Part D: Client (async)");
    const N: usize = 64;

    // D1: fan-out puts, every callback on the loop thread
    let (tx, rx) = mpsc::channel();
    let mut submitted = 0;
    for i in 0..N {
        let key = RecordKey::new("test", "fan", format!("k{}", i));
        let tx = tx.clone();
        let out = client.put_key(&key, &[Bin::new("i", i.to_string())], None, move |reply| {
            let on_loop = std::thread::current().name() == Some("evbridge-smoke");
            let _ = tx.send(reply.is_ok() && on_loop);
        });
        if out.is_ok() {
            submitted += 1;
        }
    }
    drop(tx);
    let ok = (0..submitted)
        .map_while(|_| rx.recv_timeout(Duration::from_secs(5)).ok())
        .filter(|ok| *ok)
        .count();
    t.check(&format!("{} async puts completed on loop thread", N), ok == N, &format!("{} ok", ok));
    t.check("no calls outstanding", client.outstanding() == 0, &format!("{}", client.outstanding()));
    t.check(&format!("backend holds {} records", N), backend.records() == N, &format!("{}", backend.records()));

    // D2: pooled key handles are reused
    let idle = client.session().pooled_available(HandleKind::KeyObject);
    t.check("key handles back in the pool", idle >= 1 && idle <= N, &format!("{} idle", idle));

    // D3: throttled submissions still complete
    let before = client.stats().throttled;
    backend.throttle_next(3);
    let r = client.get_key_blocking(&RecordKey::new("test", "fan", "k0"));
    t.check("get after 3 throttles", matches!(r, Ok(Ok(_))), &format!("{:?}", r));
    t.check("throttle counter +3", client.stats().throttled == before + 3, &format!("{:?}", client.stats()));
}

// ════════════════════════════════════════════════════════════
// Part E: Info and shutdown
// ════════════════════════════════════════════════════════════

fn test_info_and_shutdown(t: &mut TestRunner, client: Client, backend: &LoopbackBackend) {
    t.section("Part E: Info and shutdown");

    // E1: info with no hosts
    let none = client.info(None, |_| {});
    t.check("info without hosts -> NoHosts", matches!(none, Err(CoreError::NoHosts)), &format!("{:?}", none));

    // E2: add host, info
    let added = client.add_host("127.0.0.1", 3000);
    t.check("add_host", added.is_ok(), &format!("{:?}", added));
    match client.info_blocking(None) {
        Ok(Ok(body)) => {
            let text = String::from_utf8_lossy(&body).into_owned();
            t.check("info names the node", text.starts_with("node\tloopback-127.0.0.1:3000"), &text);
        }
        other => t.fail("info", &format!("{:?}", other)),
    }
    let active = client.active_hosts();
    t.check("one active host", matches!(active, Ok(1)), &format!("{:?}", active));

    // E3: shutdown, with the work queue paused
    client.session().dispatcher().pause();
    let down = client.shutdown();
    t.check("shutdown", down.is_ok(), &format!("{:?}", down));
    t.check("cluster destroyed", !backend.is_cluster_live(), "cluster still live");

    // E4: ops after shutdown
    let late = client.get_key(&RecordKey::new("test", "demo", "late"), |_| {});
    t.check("get after shutdown -> OrderViolation",
        matches!(late, Err(CoreError::OrderViolation(_))), &format!("{:?}", late));
    t.check("second shutdown rejected", client.shutdown().is_err(), "shutdown ran twice");

    // E5: unsupported backend
    let v3 = Client::connect_default(ClientConfig::new(), &backend_library(), BackendVersion::V3, LibraryKind::NonBlocking);
    t.check("v3 connect -> Unsupported",
        matches!(v3, Err(CoreError::Unsupported { .. })), "connected");
}

fn backend_library() -> evbridge_module::LibraryHandle {
    LoopbackBackend::new().library()
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

// ════════════════════════════════════════════════════════════

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    println!("=== evbridge End-to-End Smoke Test ===");
    let mut t = TestRunner::new();

    test_lifecycle(&mut t);
    test_dispatcher(&mut t);

    let (client, backend) = match loopback_client() {
        Ok(c) => c,
        Err(e) => {
            println!("\nFATAL: connect failed: {}", e);
            t.summary();
            std::process::exit(1);
        }
    };
    tracing::info!(version = %client.version(), kind = %client.kind(), "loopback client up");

    test_blocking(&mut t, &client, &backend);
    test_async(&mut t, &client, &backend);
    test_info_and_shutdown(&mut t, client, &backend);

    t.summary();
    std::process::exit(if t.failed > 0 { 1 } else { 0 });
}
