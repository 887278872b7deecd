//! Capability traits.
//!
//! A client is composed of one implementation per operation group. Which
//! implementations are used depends on the backend version and on whether
//! the native library is the blocking or the non-blocking flavour;
//! combinations without support get `Unsupported`, which fails every call
//! with `CoreError::Unsupported`.

use crate::key::{Digest, RecordKey};
use crate::session::Session;
use crate::unsupported::Unsupported;
use crate::v2::{V2Common, V2Digests, V2Info, V2Keys};

use evbridge_core::error::{CallError, Result};
use evbridge_core::frame::{Bin, Record};
use evbridge_core::log_level::LogLevel;
use evbridge_core::params::WriteParameters;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendVersion {
    V2,
    V3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryKind {
    Blocking,
    NonBlocking,
}

impl fmt::Display for BackendVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendVersion::V2 => f.write_str("v2"),
            BackendVersion::V3 => f.write_str("v3"),
        }
    }
}

impl fmt::Display for LibraryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryKind::Blocking => f.write_str("blocking"),
            LibraryKind::NonBlocking => f.write_str("non-blocking"),
        }
    }
}

/// Outcome of a record operation as seen by its callback.
pub type RecordReply = std::result::Result<Record, CallError>;
/// Outcome of an info request.
pub type InfoReply = std::result::Result<Vec<u8>, CallError>;

pub type RecordCallback = Box<dyn FnOnce(RecordReply) + Send>;
pub type InfoCallback = Box<dyn FnOnce(InfoReply) + Send>;

/// Cluster lifecycle and host management.
pub trait CommonOps: Send + Sync {
    fn create_cluster(&self) -> Result<()>;
    fn add_host(&self, host: &str, port: u16) -> Result<()>;
    fn hosts(&self) -> Vec<(String, u16)>;
    /// Nodes the backend currently has a connection to.
    fn active_hosts(&self) -> Result<usize>;
    fn shutdown_cluster(&self) -> Result<()>;
    fn log_level(&self) -> Result<LogLevel>;
    fn set_log_level(&self, level: LogLevel) -> Result<()>;
}

/// Operations addressed by `RecordKey`.
pub trait KeyOps: Send + Sync {
    fn get_key(&self, key: &RecordKey, timeout_ms: u32, callback: RecordCallback) -> Result<()>;

    fn select_key(&self, key: &RecordKey, bins: &[&str], timeout_ms: u32, callback: RecordCallback) -> Result<()>;

    fn put_key(
        &self,
        key: &RecordKey,
        bins: &[Bin],
        params: Option<WriteParameters>,
        timeout_ms: u32,
        callback: RecordCallback,
    ) -> Result<()>;

    fn remove_key(
        &self,
        key: &RecordKey,
        params: Option<WriteParameters>,
        timeout_ms: u32,
        callback: RecordCallback,
    ) -> Result<()>;
}

/// Operations addressed by digest.
pub trait DigestOps: Send + Sync {
    /// Digest of `key` in `set`, computed locally and synchronously.
    fn calculate_digest(&self, set: &str, key: &[u8]) -> Result<Digest>;

    fn get_digest(&self, namespace: &str, digest: &Digest, timeout_ms: u32, callback: RecordCallback) -> Result<()>;

    fn remove_digest(
        &self,
        namespace: &str,
        digest: &Digest,
        params: Option<WriteParameters>,
        timeout_ms: u32,
        callback: RecordCallback,
    ) -> Result<()>;
}

/// Node info requests.
pub trait InfoOps: Send + Sync {
    /// Query `host`, or the first known host when `None`.
    fn info(&self, host: Option<(&str, u16)>, timeout_ms: u32, callback: InfoCallback) -> Result<()>;
}

/// One implementation per operation group.
pub struct Capabilities {
    pub common: Box<dyn CommonOps>,
    pub keys: Box<dyn KeyOps>,
    pub digests: Box<dyn DigestOps>,
    pub info: Box<dyn InfoOps>,
}

impl Capabilities {
    pub fn select(version: BackendVersion, kind: LibraryKind, session: &Arc<Session>) -> Self {
        match (version, kind) {
            (BackendVersion::V2, LibraryKind::NonBlocking) => Self {
                common: Box::new(V2Common::new(session.clone())),
                keys: Box::new(V2Keys::new(session.clone())),
                digests: Box::new(V2Digests::new(session.clone())),
                info: Box::new(V2Info::new(session.clone())),
            },
            _ => {
                tracing::warn!(%version, %kind, "no implementation for backend, every operation will fail");
                let backend = format!("{} {}", version, kind);
                Self {
                    common: Box::new(Unsupported::new(backend.clone())),
                    keys: Box::new(Unsupported::new(backend.clone())),
                    digests: Box::new(Unsupported::new(backend.clone())),
                    info: Box::new(Unsupported::new(backend)),
                }
            }
        }
    }
}
