//! Placeholder capability for backends without an implementation.

use crate::capability::{CommonOps, DigestOps, InfoCallback, InfoOps, KeyOps, RecordCallback};
use crate::key::{Digest, RecordKey};

use evbridge_core::error::{CoreError, Result};
use evbridge_core::frame::Bin;
use evbridge_core::log_level::LogLevel;
use evbridge_core::params::WriteParameters;

pub struct Unsupported {
    backend: String,
}

impl Unsupported {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
        }
    }

    fn fail<T>(&self, op: &'static str) -> Result<T> {
        Err(CoreError::Unsupported {
            op,
            backend: self.backend.clone(),
        })
    }
}

impl CommonOps for Unsupported {
    fn create_cluster(&self) -> Result<()> {
        self.fail("create_cluster")
    }

    fn add_host(&self, _host: &str, _port: u16) -> Result<()> {
        self.fail("add_host")
    }

    fn hosts(&self) -> Vec<(String, u16)> {
        Vec::new()
    }

    fn active_hosts(&self) -> Result<usize> {
        self.fail("active_hosts")
    }

    fn shutdown_cluster(&self) -> Result<()> {
        self.fail("shutdown_cluster")
    }

    fn log_level(&self) -> Result<LogLevel> {
        self.fail("log_level")
    }

    fn set_log_level(&self, _level: LogLevel) -> Result<()> {
        self.fail("set_log_level")
    }
}

impl KeyOps for Unsupported {
    fn get_key(&self, _key: &RecordKey, _timeout_ms: u32, _callback: RecordCallback) -> Result<()> {
        self.fail("get_key")
    }

    fn select_key(&self, _key: &RecordKey, _bins: &[&str], _timeout_ms: u32, _callback: RecordCallback) -> Result<()> {
        self.fail("select_key")
    }

    fn put_key(
        &self,
        _key: &RecordKey,
        _bins: &[Bin],
        _params: Option<WriteParameters>,
        _timeout_ms: u32,
        _callback: RecordCallback,
    ) -> Result<()> {
        self.fail("put_key")
    }

    fn remove_key(
        &self,
        _key: &RecordKey,
        _params: Option<WriteParameters>,
        _timeout_ms: u32,
        _callback: RecordCallback,
    ) -> Result<()> {
        self.fail("remove_key")
    }
}

impl DigestOps for Unsupported {
    fn calculate_digest(&self, _set: &str, _key: &[u8]) -> Result<Digest> {
        self.fail("calculate_digest")
    }

    fn get_digest(&self, _namespace: &str, _digest: &Digest, _timeout_ms: u32, _callback: RecordCallback) -> Result<()> {
        self.fail("get_digest")
    }

    fn remove_digest(
        &self,
        _namespace: &str,
        _digest: &Digest,
        _params: Option<WriteParameters>,
        _timeout_ms: u32,
        _callback: RecordCallback,
    ) -> Result<()> {
        self.fail("remove_digest")
    }
}

impl InfoOps for Unsupported {
    fn info(&self, _host: Option<(&str, u16)>, _timeout_ms: u32, _callback: InfoCallback) -> Result<()> {
        self.fail("info")
    }
}
