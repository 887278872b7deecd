//! In-memory backend speaking the v2 call surface.
//!
//! `LoopbackBackend` stores records in a map and answers every async call
//! with a completion, either inline from inside the native call or, once
//! `deliver_via` is set, from the event base's next step. It can be told
//! to reject the next few submissions with the throttle or client-error
//! codes, which is how dispatcher retry paths are exercised end to end.

use crate::deferred::DeferHandle;
use crate::surface::{CallSurface, Exports, LibraryHandle};
use crate::symbols::{self, DIGEST_LEN};
use evbridge_core::codes;
use evbridge_core::frame::{Bin, CallFrame, FrameCompleter, Payload, Record};
use evbridge_core::params::WriteParameters;
use parking_lot::Mutex;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

const NOT_FOUND: i32 = 2;
const GENERATION: i32 = 3;
const PARAMETER: i32 = 4;
const UNAVAILABLE: i32 = 11;

pub type Digest = [u8; DIGEST_LEN];

/// Log level a fresh backend starts at.
const DEFAULT_LOG_LEVEL: i32 = 2;

/// Digest the loopback backend files a `(set, key)` pair under.
pub fn digest_of(set: &[u8], key: &[u8]) -> Digest {
    fn fnv1a(seed: u64, parts: &[&[u8]]) -> u64 {
        let mut h = seed;
        for part in parts {
            for &b in *part {
                h ^= b as u64;
                h = h.wrapping_mul(0x0000_0100_0000_01b3);
            }
            h ^= 0xff;
        }
        h
    }
    let a = fnv1a(0xcbf2_9ce4_8422_2325, &[set, key]);
    let b = fnv1a(a, &[key, set]);
    let mut d = [0u8; DIGEST_LEN];
    d[..8].copy_from_slice(&a.to_le_bytes());
    d[8..16].copy_from_slice(&b.to_le_bytes());
    d[16..].copy_from_slice(&(a ^ b).to_le_bytes()[..4]);
    d
}

pub struct LoopbackBackend {
    records: Mutex<HashMap<(String, Digest), Record>>,
    hosts: Mutex<Vec<(String, u16)>>,
    cluster_live: AtomicBool,
    log_level: AtomicI32,
    delivery: Mutex<Option<DeferHandle>>,
    throttle: AtomicUsize,
    client_errors: AtomicUsize,
    submissions: AtomicUsize,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            hosts: Mutex::new(Vec::new()),
            cluster_live: AtomicBool::new(false),
            log_level: AtomicI32::new(DEFAULT_LOG_LEVEL),
            delivery: Mutex::new(None),
            throttle: AtomicUsize::new(0),
            client_errors: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        }
    }
}

impl LoopbackBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deliver completions through `handle` instead of inline.
    pub fn deliver_via(&self, handle: DeferHandle) {
        *self.delivery.lock() = Some(handle);
    }

    /// Reject the next `n` async submissions with the throttle code.
    pub fn throttle_next(&self, n: usize) {
        self.throttle.store(n, Ordering::SeqCst);
    }

    /// Reject the next `n` async submissions with the client-error code.
    pub fn fail_next(&self, n: usize) {
        self.client_errors.store(n, Ordering::SeqCst);
    }

    /// Async submissions seen, including rejected ones.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> usize {
        self.records.lock().len()
    }

    pub fn hosts(&self) -> Vec<(String, u16)> {
        self.hosts.lock().clone()
    }

    pub fn is_cluster_live(&self) -> bool {
        self.cluster_live.load(Ordering::SeqCst)
    }

    /// Raw native log level last set.
    pub fn log_level(&self) -> i32 {
        self.log_level.load(Ordering::SeqCst)
    }

    /// Every v2 function, bound to this backend.
    pub fn exports(self: &Arc<Self>) -> Exports {
        let sync = |f: fn(&Self, &CallFrame) -> i32| {
            let this = self.clone();
            move |frame: &CallFrame| f(&this, frame)
        };
        let async_op = |f: fn(&Self, &CallFrame) -> (i32, Payload)| {
            let this = self.clone();
            move |frame: &CallFrame| this.submit(frame, f)
        };

        Exports::new()
            .export(symbols::INIT, |_| codes::OK)
            .export(symbols::SHUTDOWN, |_| codes::OK)
            .export(symbols::CLUSTER_CREATE, sync(Self::cluster_create))
            .export(symbols::CLUSTER_ADD_HOST, sync(Self::cluster_add_host))
            .export(symbols::CLUSTER_DESTROY, sync(Self::cluster_destroy))
            .export(symbols::ACTIVE_NODE_COUNT, sync(Self::active_node_count))
            .export(symbols::CALCULATE_DIGEST, sync(Self::calculate_digest))
            .export(symbols::GET_LOG_LEVEL, sync(Self::get_log_level))
            .export(symbols::SET_LOG_LEVEL, sync(Self::set_log_level))
            .export(symbols::GET_ALL, async_op(Self::get_all))
            .export(symbols::GET, async_op(Self::get))
            .export(symbols::PUT, async_op(Self::put))
            .export(symbols::DELETE, async_op(Self::delete))
            .export(symbols::GET_ALL_DIGEST, async_op(Self::get_all_digest))
            .export(symbols::DELETE_DIGEST, async_op(Self::delete_digest))
            .export(symbols::INFO, async_op(Self::info))
    }

    /// A library handle whose surface is already linked to this backend.
    pub fn library(self: &Arc<Self>) -> LibraryHandle {
        LibraryHandle::linked(CallSurface::link("loopback", symbols::V2_NONBLOCKING, &self.exports()))
    }

    fn submit(&self, frame: &CallFrame, op: fn(&Self, &CallFrame) -> (i32, Payload)) -> i32 {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.throttle) {
            return codes::FAIL_THROTTLED;
        }
        if take_one(&self.client_errors) {
            return codes::FAIL_CLIENT_ERROR;
        }
        // Arguments are read in full before completing: the caller's
        // buffers are released as soon as the completion is handled.
        let (code, payload) = op(self, frame);
        self.finish(frame.completer(), code, payload);
        codes::OK
    }

    fn finish(&self, completer: FrameCompleter, code: i32, payload: Payload) {
        let delivery = self.delivery.lock().clone();
        match delivery {
            Some(handle) => handle.defer(move || completer.complete(code, payload)),
            None => completer.complete(code, payload),
        }
    }

    fn cluster_create(&self, _frame: &CallFrame) -> i32 {
        self.cluster_live.store(true, Ordering::SeqCst);
        codes::OK
    }

    fn cluster_add_host(&self, frame: &CallFrame) -> i32 {
        if !self.is_cluster_live() {
            return codes::FAIL_CLIENT_ERROR;
        }
        let (Some(host), Some(&port)) = (text(frame, 0), frame.ints.first()) else {
            return PARAMETER;
        };
        let entry = (host, port as u16);
        let mut hosts = self.hosts.lock();
        if !hosts.contains(&entry) {
            hosts.push(entry);
        }
        codes::OK
    }

    fn cluster_destroy(&self, _frame: &CallFrame) -> i32 {
        self.cluster_live.store(false, Ordering::SeqCst);
        self.hosts.lock().clear();
        codes::OK
    }

    fn active_node_count(&self, _frame: &CallFrame) -> i32 {
        if !self.is_cluster_live() {
            return 0;
        }
        self.hosts.lock().len() as i32
    }

    /// Completes inline even with `deliver_via` set: the caller reads the
    /// digest before this returns.
    fn calculate_digest(&self, frame: &CallFrame) -> i32 {
        let (Some(set), Some(key)) = (arg(frame, 0), arg(frame, 1)) else {
            return PARAMETER;
        };
        frame.complete(codes::OK, Payload::Response(digest_of(set, key).to_vec()));
        codes::OK
    }

    fn get_log_level(&self, _frame: &CallFrame) -> i32 {
        self.log_level()
    }

    fn set_log_level(&self, frame: &CallFrame) -> i32 {
        match frame.ints.first() {
            Some(&level) if (-1..=3).contains(&level) => {
                self.log_level.store(level as i32, Ordering::SeqCst);
                codes::OK
            }
            _ => PARAMETER,
        }
    }

    fn get_all(&self, frame: &CallFrame) -> (i32, Payload) {
        let Some(id) = key_id(frame) else {
            return (PARAMETER, Payload::None);
        };
        match self.records.lock().get(&id) {
            Some(record) => (codes::OK, Payload::Record(record.clone())),
            None => (NOT_FOUND, Payload::None),
        }
    }

    fn get(&self, frame: &CallFrame) -> (i32, Payload) {
        let Some(id) = key_id(frame) else {
            return (PARAMETER, Payload::None);
        };
        let count = frame.ints.first().copied().unwrap_or(0) as usize;
        let names: Vec<String> = (0..count).filter_map(|i| text(frame, 3 + i)).collect();
        match self.records.lock().get(&id) {
            Some(record) => {
                let bins = record
                    .bins
                    .iter()
                    .filter(|b| names.iter().any(|n| *n == b.name))
                    .cloned()
                    .collect();
                (
                    codes::OK,
                    Payload::Record(Record {
                        bins,
                        generation: record.generation,
                        expiration: record.expiration,
                    }),
                )
            }
            None => (NOT_FOUND, Payload::None),
        }
    }

    fn put(&self, frame: &CallFrame) -> (i32, Payload) {
        let (Some(id), Some(params)) = (key_id(frame), params_at(frame, 3)) else {
            return (PARAMETER, Payload::None);
        };
        let count = frame.ints.first().copied().unwrap_or(0) as usize;
        let mut bins = Vec::with_capacity(count);
        for i in 0..count {
            match (text(frame, 4 + 2 * i), arg(frame, 5 + 2 * i)) {
                (Some(name), Some(value)) => bins.push(Bin::new(name, value)),
                _ => return (PARAMETER, Payload::None),
            }
        }
        if bins.is_empty() {
            return (PARAMETER, Payload::None);
        }

        let mut records = self.records.lock();
        let current = records.get(&id).map_or(0, |r| r.generation);
        if params.use_generation && params.generation != current {
            return (GENERATION, Payload::None);
        }
        let record = records.entry(id).or_default();
        for bin in bins {
            match record.bins.iter_mut().find(|b| b.name == bin.name) {
                Some(existing) => existing.value = bin.value,
                None => record.bins.push(bin),
            }
        }
        record.generation += 1;
        record.expiration = params.expiration;
        (
            codes::OK,
            Payload::Record(Record {
                bins: Vec::new(),
                generation: record.generation,
                expiration: record.expiration,
            }),
        )
    }

    fn delete(&self, frame: &CallFrame) -> (i32, Payload) {
        let (Some(id), Some(params)) = (key_id(frame), params_at(frame, 3)) else {
            return (PARAMETER, Payload::None);
        };
        self.remove(id, params)
    }

    fn get_all_digest(&self, frame: &CallFrame) -> (i32, Payload) {
        let Some(id) = digest_id(frame) else {
            return (PARAMETER, Payload::None);
        };
        match self.records.lock().get(&id) {
            Some(record) => (codes::OK, Payload::Record(record.clone())),
            None => (NOT_FOUND, Payload::None),
        }
    }

    fn delete_digest(&self, frame: &CallFrame) -> (i32, Payload) {
        let (Some(id), Some(params)) = (digest_id(frame), params_at(frame, 2)) else {
            return (PARAMETER, Payload::None);
        };
        self.remove(id, params)
    }

    fn remove(&self, id: (String, Digest), params: WriteParameters) -> (i32, Payload) {
        let mut records = self.records.lock();
        let generation = match records.get(&id) {
            Some(r) => r.generation,
            None => return (NOT_FOUND, Payload::None),
        };
        if params.use_generation && generation != params.generation {
            return (GENERATION, Payload::None);
        }
        records.remove(&id);
        (codes::OK, Payload::None)
    }

    fn info(&self, frame: &CallFrame) -> (i32, Payload) {
        let (Some(host), Some(&port)) = (text(frame, 0), frame.ints.first()) else {
            return (PARAMETER, Payload::None);
        };
        let port = port as u16;
        if !self.hosts.lock().iter().any(|(h, p)| *h == host && *p == port) {
            return (UNAVAILABLE, Payload::None);
        }
        let body = format!(
            "node\tloopback-{}:{}\nobjects\t{}\n",
            host,
            port,
            self.records.lock().len()
        );
        (codes::OK, Payload::Response(body.into_bytes()))
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn arg(frame: &CallFrame, i: usize) -> Option<&[u8]> {
    // Safety: the frame is being executed, so its pending call still owns
    // the buffers behind these refs.
    frame.buffers.get(i).map(|b| unsafe { b.as_slice() })
}

fn text(frame: &CallFrame, i: usize) -> Option<String> {
    arg(frame, i).map(|b| String::from_utf8_lossy(b).into_owned())
}

fn key_id(frame: &CallFrame) -> Option<(String, Digest)> {
    let ns = text(frame, 0)?;
    let set = arg(frame, 1)?;
    let key = arg(frame, 2)?;
    Some((ns, digest_of(set, key)))
}

fn digest_id(frame: &CallFrame) -> Option<(String, Digest)> {
    let ns = text(frame, 0)?;
    let digest: Digest = arg(frame, 1)?.try_into().ok()?;
    Some((ns, digest))
}

fn params_at(frame: &CallFrame, i: usize) -> Option<WriteParameters> {
    match arg(frame, i)? {
        [] => Some(WriteParameters::default()),
        raw => WriteParameters::decode(raw),
    }
}
