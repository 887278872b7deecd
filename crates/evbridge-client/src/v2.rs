//! Capabilities of the non-blocking v2 library.

use crate::capability::{
    CommonOps, DigestOps, InfoCallback, InfoOps, KeyOps, RecordCallback,
};
use crate::key::{Digest, RecordKey};
use crate::session::{Callback, HandleKind, Pins, Session};

use evbridge_core::codes;
use evbridge_core::error::{CallError, CoreError, Result};
use evbridge_core::frame::{Bin, Payload, Record};
use evbridge_core::lifecycle::{Gate, StateType, StateValue};
use evbridge_core::log_level::LogLevel;
use evbridge_core::params::WriteParameters;
use evbridge_executor::DispatcherStates;
use evbridge_module::symbols::{self, DIGEST_LEN};

use std::sync::Arc;

/// State type of the backend cluster handle.
pub enum ClusterStates {}

impl StateType for ClusterStates {
    const NAME: &'static str = "ClusterStates";
}

impl ClusterStates {
    pub const UNINITIALIZED: StateValue = StateValue::UNINITIALIZED;
    pub const INITIALIZED: StateValue = StateValue(1);
}

/// Timeout for synchronous cluster calls made on the loop thread.
const CLUSTER_CALL_TIMEOUT_MS: u32 = 1000;

fn check(code: i32) -> Result<()> {
    if code == codes::OK {
        Ok(())
    } else {
        Err(CallError::from_code(code).into())
    }
}

/// A destroy or shutdown that timed out is still queued as a control item
/// and runs before the loop stops, so the cluster counts as gone.
fn in_flight(op: &'static str, outcome: Result<i32>) -> Result<i32> {
    match outcome {
        Err(CoreError::Timeout) => {
            tracing::warn!(op, "cluster call still in flight after timeout");
            Ok(codes::OK)
        }
        other => other,
    }
}

fn record_reply(callback: RecordCallback) -> Callback {
    Box::new(move |reply| {
        callback(reply.map(|payload| match payload {
            Payload::Record(record) => record,
            _ => Record::default(),
        }))
    })
}

fn info_reply(callback: InfoCallback) -> Callback {
    Box::new(move |reply| {
        callback(reply.map(|payload| match payload {
            Payload::Response(body) => body,
            _ => Vec::new(),
        }))
    })
}

/// Pin write parameters; `None` is passed as an empty block.
fn pin_params(session: &Session, pins: &mut Pins, params: Option<WriteParameters>) {
    session.pin_pooled(pins, HandleKind::WriteParameters, |buf| match params {
        Some(p) => p.encode_into(buf),
        None => buf.clear(),
    });
}

fn pin_key(session: &Session, key: &RecordKey) -> Pins {
    let mut pins = Pins::new();
    pins.bytes(key.namespace.as_str()).bytes(key.set.as_str());
    session.pin_pooled(&mut pins, HandleKind::KeyObject, |buf| buf.extend_from_slice(&key.key));
    pins
}

fn pin_digest(session: &Session, namespace: &str, digest: &Digest) -> Pins {
    let mut pins = Pins::new();
    pins.bytes(namespace);
    session.pin_pooled(&mut pins, HandleKind::Digest, |buf| {
        buf.clear();
        buf.extend_from_slice(digest.as_bytes());
    });
    pins
}

pub struct V2Common {
    session: Arc<Session>,
}

impl V2Common {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl CommonOps for V2Common {
    fn create_cluster(&self) -> Result<()> {
        let gate = Gate::define::<ClusterStates>(ClusterStates::UNINITIALIZED, Some(ClusterStates::INITIALIZED))
            .and(Gate::require::<DispatcherStates>(DispatcherStates::INITIALIZED));
        self.session.lifecycle().run(&gate, || {
            check(self.session.call_inline(symbols::INIT, &Pins::new(), Vec::new())?)?;
            check(self.session.call_inline(symbols::CLUSTER_CREATE, &Pins::new(), Vec::new())?)?;
            tracing::debug!(library = self.session.surface().library(), "cluster created");
            Ok(())
        })
    }

    fn add_host(&self, host: &str, port: u16) -> Result<()> {
        let gate = Gate::require::<ClusterStates>(ClusterStates::INITIALIZED).and(Gate::require::<DispatcherStates>(
            DispatcherStates::INITIALIZED | DispatcherStates::RUNNING,
        ));
        self.session.lifecycle().run(&gate, || {
            if !self.session.remember_host(host, port) {
                return Ok(());
            }
            let mut pins = Pins::new();
            pins.bytes(host);
            self.session.fire(symbols::CLUSTER_ADD_HOST, pins, vec![port as i64])?;
            tracing::info!(host, port, "host added");
            Ok(())
        })
    }

    fn hosts(&self) -> Vec<(String, u16)> {
        self.session.hosts()
    }

    fn active_hosts(&self) -> Result<usize> {
        let gate = Gate::require::<ClusterStates>(ClusterStates::INITIALIZED).and(Gate::require::<DispatcherStates>(
            DispatcherStates::INITIALIZED | DispatcherStates::RUNNING,
        ));
        self.session.lifecycle().run(&gate, || {
            let count = self.session.call_serialized(
                symbols::ACTIVE_NODE_COUNT,
                Pins::new(),
                Vec::new(),
                CLUSTER_CALL_TIMEOUT_MS,
            )?;
            usize::try_from(count).map_err(|_| CoreError::from(CallError::from_code(count)))
        })
    }

    fn shutdown_cluster(&self) -> Result<()> {
        let gate = Gate::define::<ClusterStates>(ClusterStates::INITIALIZED, Some(ClusterStates::UNINITIALIZED));
        self.session.lifecycle().run(&gate, || {
            let destroyed = self.session.call_serialized(
                symbols::CLUSTER_DESTROY,
                Pins::new(),
                Vec::new(),
                CLUSTER_CALL_TIMEOUT_MS,
            );
            self.session.forget_hosts();
            check(in_flight(symbols::CLUSTER_DESTROY, destroyed)?)?;
            let shut = self.session.call_serialized(symbols::SHUTDOWN, Pins::new(), Vec::new(), CLUSTER_CALL_TIMEOUT_MS);
            check(in_flight(symbols::SHUTDOWN, shut)?)
        })
    }

    fn log_level(&self) -> Result<LogLevel> {
        let raw = self.session.call_serialized(symbols::GET_LOG_LEVEL, Pins::new(), Vec::new(), CLUSTER_CALL_TIMEOUT_MS)?;
        LogLevel::from_raw(raw).ok_or_else(|| CoreError::InvalidArgument(format!("native log level {} out of range", raw)))
    }

    fn set_log_level(&self, level: LogLevel) -> Result<()> {
        check(self.session.call_serialized(
            symbols::SET_LOG_LEVEL,
            Pins::new(),
            vec![level.raw() as i64],
            CLUSTER_CALL_TIMEOUT_MS,
        )?)?;
        tracing::debug!(%level, "native log level set");
        Ok(())
    }
}

pub struct V2Keys {
    session: Arc<Session>,
}

impl V2Keys {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl KeyOps for V2Keys {
    fn get_key(&self, key: &RecordKey, timeout_ms: u32, callback: RecordCallback) -> Result<()> {
        let pins = pin_key(&self.session, key);
        self.session
            .dispatch(symbols::GET_ALL, pins, Vec::new(), timeout_ms, record_reply(callback))
            .map(drop)
    }

    fn select_key(&self, key: &RecordKey, bins: &[&str], timeout_ms: u32, callback: RecordCallback) -> Result<()> {
        let mut pins = pin_key(&self.session, key);
        for name in bins {
            pins.bytes(*name);
        }
        self.session
            .dispatch(symbols::GET, pins, vec![bins.len() as i64], timeout_ms, record_reply(callback))
            .map(drop)
    }

    fn put_key(
        &self,
        key: &RecordKey,
        bins: &[Bin],
        params: Option<WriteParameters>,
        timeout_ms: u32,
        callback: RecordCallback,
    ) -> Result<()> {
        if bins.is_empty() {
            return Err(CoreError::InvalidArgument("no bins to write".into()));
        }
        let mut pins = pin_key(&self.session, key);
        pin_params(&self.session, &mut pins, params);
        for bin in bins {
            pins.bytes(bin.name.as_str()).bytes(bin.value.as_slice());
        }
        self.session
            .dispatch(symbols::PUT, pins, vec![bins.len() as i64], timeout_ms, record_reply(callback))
            .map(drop)
    }

    fn remove_key(
        &self,
        key: &RecordKey,
        params: Option<WriteParameters>,
        timeout_ms: u32,
        callback: RecordCallback,
    ) -> Result<()> {
        let mut pins = pin_key(&self.session, key);
        pin_params(&self.session, &mut pins, params);
        self.session
            .dispatch(symbols::DELETE, pins, Vec::new(), timeout_ms, record_reply(callback))
            .map(drop)
    }
}

pub struct V2Digests {
    session: Arc<Session>,
}

impl V2Digests {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl DigestOps for V2Digests {
    fn calculate_digest(&self, set: &str, key: &[u8]) -> Result<Digest> {
        let mut pins = Pins::new();
        pins.bytes(set);
        self.session
            .pin_pooled(&mut pins, HandleKind::KeyObject, |buf| buf.extend_from_slice(key));
        let (code, payload) = self.session.call_direct(symbols::CALCULATE_DIGEST, pins, Vec::new());
        check(code)?;
        match payload {
            Payload::Response(bytes) => <[u8; DIGEST_LEN]>::try_from(bytes.as_slice())
                .map(Digest::from)
                .map_err(|_| CoreError::InvalidArgument(format!("digest of {} bytes", bytes.len()))),
            _ => Err(CoreError::InvalidArgument("no digest returned".into())),
        }
    }

    fn get_digest(&self, namespace: &str, digest: &Digest, timeout_ms: u32, callback: RecordCallback) -> Result<()> {
        let pins = pin_digest(&self.session, namespace, digest);
        self.session
            .dispatch(symbols::GET_ALL_DIGEST, pins, Vec::new(), timeout_ms, record_reply(callback))
            .map(drop)
    }

    fn remove_digest(
        &self,
        namespace: &str,
        digest: &Digest,
        params: Option<WriteParameters>,
        timeout_ms: u32,
        callback: RecordCallback,
    ) -> Result<()> {
        let mut pins = pin_digest(&self.session, namespace, digest);
        pin_params(&self.session, &mut pins, params);
        self.session
            .dispatch(symbols::DELETE_DIGEST, pins, Vec::new(), timeout_ms, record_reply(callback))
            .map(drop)
    }
}

pub struct V2Info {
    session: Arc<Session>,
}

impl V2Info {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

impl InfoOps for V2Info {
    fn info(&self, host: Option<(&str, u16)>, timeout_ms: u32, callback: InfoCallback) -> Result<()> {
        let (host, port) = match host {
            Some((h, p)) => (h.to_string(), p),
            None => self.session.first_host().ok_or(CoreError::NoHosts)?,
        };
        let mut pins = Pins::new();
        pins.bytes(host);
        self.session
            .dispatch(symbols::INFO, pins, vec![port as i64], timeout_ms, info_reply(callback))
            .map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_cluster_call_counts_as_done() {
        assert_eq!(in_flight(symbols::CLUSTER_DESTROY, Err(CoreError::Timeout)).unwrap(), codes::OK);
        assert_eq!(in_flight(symbols::CLUSTER_DESTROY, Ok(-1)).unwrap(), -1);
        assert!(matches!(
            in_flight(symbols::SHUTDOWN, Err(CoreError::NoHosts)),
            Err(CoreError::NoHosts)
        ));
    }
}
