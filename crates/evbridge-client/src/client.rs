//! The composed client.
//!
//! ```rust,ignore
//! let library = LibraryHandle::new("libev2citrusleaf", load_surface);
//! let client = Client::connect_default(ClientConfig::from_env(), &library,
//!                                      BackendVersion::V2, LibraryKind::NonBlocking)?;
//! client.add_host("127.0.0.1", 3000)?;
//! client.put_key_blocking(&key, &[Bin::new("name", b"ada".to_vec())], None)??;
//! let record = client.get_key_blocking(&key)??;
//! client.shutdown()?;
//! ```
//!
//! Async operations return once the call is queued; the callback runs
//! later on the loop thread. Blocking variants wait for the callback and
//! return its reply, bounded by the call timeout plus a grace period.

use crate::capability::{BackendVersion, Capabilities, InfoReply, LibraryKind, RecordReply};
use crate::config::ClientConfig;
use crate::key::{Digest, RecordKey};
use crate::session::{BoxedEventBase, Session};
use crate::v2::ClusterStates;

use evbridge_core::error::{CoreError, Result};
use evbridge_core::frame::Bin;
use evbridge_core::log_level::LogLevel;
use evbridge_core::params::WriteParameters;
use evbridge_executor::{DispatcherStats, SyncAdapter};
use evbridge_module::{DefaultEventBase, LibraryHandle};
use parking_lot::Mutex;

use std::io;
use std::sync::Arc;

pub struct Client {
    session: Arc<Session>,
    caps: Capabilities,
    version: BackendVersion,
    kind: LibraryKind,
    timeout_ms: u32,
    blocking_records: SyncAdapter<RecordReply>,
    blocking_info: SyncAdapter<InfoReply>,
}

impl Client {
    /// Link the library, create the event base and the cluster, and start
    /// the loop thread.
    pub fn connect<F>(
        config: ClientConfig,
        library: &LibraryHandle,
        version: BackendVersion,
        kind: LibraryKind,
        event_base: F,
    ) -> Result<Self>
    where
        F: Fn() -> io::Result<BoxedEventBase> + Send + Sync + 'static,
    {
        let surface = library.surface()?;
        let session = Arc::new(Session::new(&config, surface, event_base));
        let caps = Capabilities::select(version, kind, &session);
        let dispatcher = session.dispatcher();

        dispatcher.setup()?;
        if let Err(e) = caps.common.create_cluster() {
            let _ = dispatcher.teardown();
            return Err(e);
        }
        if !config.native_logging {
            if let Err(e) = caps.common.set_log_level(LogLevel::NoLogging) {
                tracing::warn!(error = %e, "could not turn native logging off");
            }
        }
        if let Err(e) = dispatcher.activate() {
            let _ = caps.common.shutdown_cluster();
            let _ = dispatcher.teardown();
            return Err(e);
        }

        tracing::info!(library = library.name(), %version, %kind, "client connected");
        Ok(Self {
            session,
            caps,
            version,
            kind,
            timeout_ms: config.timeout_ms,
            blocking_records: SyncAdapter::new(),
            blocking_info: SyncAdapter::new(),
        })
    }

    /// Connect using the platform's default event base.
    pub fn connect_default(
        config: ClientConfig,
        library: &LibraryHandle,
        version: BackendVersion,
        kind: LibraryKind,
    ) -> Result<Self> {
        Self::connect(config, library, version, kind, || {
            let base: BoxedEventBase = Box::new(DefaultEventBase::new()?);
            Ok(base)
        })
    }

    /// Connect using an event base built by the caller (for instance one
    /// whose defer handle was given to the backend).
    pub fn connect_with_base(
        config: ClientConfig,
        library: &LibraryHandle,
        version: BackendVersion,
        kind: LibraryKind,
        base: BoxedEventBase,
    ) -> Result<Self> {
        let slot = Mutex::new(Some(base));
        Self::connect(config, library, version, kind, move || {
            slot.lock()
                .take()
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "event base already handed over"))
        })
    }

    pub fn version(&self) -> BackendVersion {
        self.version
    }

    pub fn kind(&self) -> LibraryKind {
        self.kind
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn stats(&self) -> DispatcherStats {
        self.session.dispatcher().stats()
    }

    /// Calls submitted whose callback has not run yet.
    pub fn outstanding(&self) -> usize {
        self.session.outstanding()
    }

    pub fn is_connected(&self) -> bool {
        self.session.lifecycle().get::<ClusterStates>() == ClusterStates::INITIALIZED
    }

    // ── Hosts ──

    pub fn add_host(&self, host: &str, port: u16) -> Result<()> {
        self.caps.common.add_host(host, port)
    }

    pub fn hosts(&self) -> Vec<(String, u16)> {
        self.caps.common.hosts()
    }

    /// Nodes the backend is connected to right now.
    pub fn active_hosts(&self) -> Result<usize> {
        self.caps.common.active_hosts()
    }

    pub fn log_level(&self) -> Result<LogLevel> {
        self.caps.common.log_level()
    }

    pub fn set_log_level(&self, level: LogLevel) -> Result<()> {
        self.caps.common.set_log_level(level)
    }

    /// Digest the backend files `key` of `set` under. Computed on the
    /// calling thread; needs neither the loop nor a live cluster.
    pub fn calculate_digest(&self, set: &str, key: &[u8]) -> Result<Digest> {
        self.caps.digests.calculate_digest(set, key)
    }

    // ── Async operations ──

    pub fn get_key<F>(&self, key: &RecordKey, callback: F) -> Result<()>
    where
        F: FnOnce(RecordReply) + Send + 'static,
    {
        self.caps.keys.get_key(key, self.timeout_ms, Box::new(callback))
    }

    pub fn select_key<F>(&self, key: &RecordKey, bins: &[&str], callback: F) -> Result<()>
    where
        F: FnOnce(RecordReply) + Send + 'static,
    {
        self.caps.keys.select_key(key, bins, self.timeout_ms, Box::new(callback))
    }

    pub fn put_key<F>(&self, key: &RecordKey, bins: &[Bin], params: Option<WriteParameters>, callback: F) -> Result<()>
    where
        F: FnOnce(RecordReply) + Send + 'static,
    {
        self.caps.keys.put_key(key, bins, params, self.timeout_ms, Box::new(callback))
    }

    pub fn remove_key<F>(&self, key: &RecordKey, params: Option<WriteParameters>, callback: F) -> Result<()>
    where
        F: FnOnce(RecordReply) + Send + 'static,
    {
        self.caps.keys.remove_key(key, params, self.timeout_ms, Box::new(callback))
    }

    pub fn get_digest<F>(&self, namespace: &str, digest: &Digest, callback: F) -> Result<()>
    where
        F: FnOnce(RecordReply) + Send + 'static,
    {
        self.caps.digests.get_digest(namespace, digest, self.timeout_ms, Box::new(callback))
    }

    pub fn remove_digest<F>(
        &self,
        namespace: &str,
        digest: &Digest,
        params: Option<WriteParameters>,
        callback: F,
    ) -> Result<()>
    where
        F: FnOnce(RecordReply) + Send + 'static,
    {
        self.caps
            .digests
            .remove_digest(namespace, digest, params, self.timeout_ms, Box::new(callback))
    }

    /// Info request to `host`, or to the first known host.
    pub fn info<F>(&self, host: Option<(&str, u16)>, callback: F) -> Result<()>
    where
        F: FnOnce(InfoReply) + Send + 'static,
    {
        self.caps.info.info(host, self.timeout_ms, Box::new(callback))
    }

    // ── Blocking operations ──

    fn wait_record<F>(&self, start: F) -> Result<RecordReply>
    where
        F: FnOnce(Box<dyn FnOnce(RecordReply) + Send>) -> Result<()>,
    {
        let wait = self.session.blocking_wait(self.timeout_ms);
        self.blocking_records
            .try_call(Some(wait), |done| start(Box::new(done.into_callback())))
    }

    pub fn get_key_blocking(&self, key: &RecordKey) -> Result<RecordReply> {
        self.wait_record(|cb| self.caps.keys.get_key(key, self.timeout_ms, cb))
    }

    pub fn select_key_blocking(&self, key: &RecordKey, bins: &[&str]) -> Result<RecordReply> {
        self.wait_record(|cb| self.caps.keys.select_key(key, bins, self.timeout_ms, cb))
    }

    pub fn put_key_blocking(
        &self,
        key: &RecordKey,
        bins: &[Bin],
        params: Option<WriteParameters>,
    ) -> Result<RecordReply> {
        self.wait_record(|cb| self.caps.keys.put_key(key, bins, params, self.timeout_ms, cb))
    }

    pub fn remove_key_blocking(&self, key: &RecordKey, params: Option<WriteParameters>) -> Result<RecordReply> {
        self.wait_record(|cb| self.caps.keys.remove_key(key, params, self.timeout_ms, cb))
    }

    pub fn get_digest_blocking(&self, namespace: &str, digest: &Digest) -> Result<RecordReply> {
        self.wait_record(|cb| self.caps.digests.get_digest(namespace, digest, self.timeout_ms, cb))
    }

    pub fn remove_digest_blocking(
        &self,
        namespace: &str,
        digest: &Digest,
        params: Option<WriteParameters>,
    ) -> Result<RecordReply> {
        self.wait_record(|cb| {
            self.caps
                .digests
                .remove_digest(namespace, digest, params, self.timeout_ms, cb)
        })
    }

    pub fn info_blocking(&self, host: Option<(&str, u16)>) -> Result<InfoReply> {
        let wait = self.session.blocking_wait(self.timeout_ms);
        self.blocking_info.try_call(Some(wait), |done| {
            self.caps.info.info(host, self.timeout_ms, Box::new(done.into_callback()))
        })
    }

    // ── Shutdown ──

    /// Destroy the cluster, stop the loop thread and free the event base.
    ///
    /// Calls still queued are abandoned without their callbacks running.
    pub fn shutdown(&self) -> Result<()> {
        self.caps.common.shutdown_cluster()?;
        let dispatcher = self.session.dispatcher();
        match dispatcher.deactivate() {
            Ok(()) | Err(CoreError::OrderViolation(_)) => {}
            Err(e) => return Err(e),
        }
        dispatcher.teardown()?;
        tracing::info!(abandoned = dispatcher.queued(), "client shut down");
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.shutdown() {
                tracing::warn!(error = %e, "shutdown on drop failed");
            }
        }
    }
}
