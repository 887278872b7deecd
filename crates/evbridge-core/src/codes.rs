//! Backend result codes.
//!
//! Native calls return an `int`. Zero is success; the negative codes are
//! client-side conditions, the positive ones come from the server.

/// Success.
pub const OK: i32 = 0;
/// Out of memory or similar client-side failure.
pub const FAIL_CLIENT_ERROR: i32 = -1;
/// Time expired before the operation completed.
pub const FAIL_TIMEOUT: i32 = -2;
/// Async communication buffer full.
pub const FAIL_THROTTLED: i32 = -3;

/// (code, name, message) for every code the backend documents.
const TABLE: &[(i32, &str, &str)] = &[
    (-1, "EV2CITRUSLEAF_FAIL_CLIENT_ERROR", "Out of memory or similar error"),
    (-2, "EV2CITRUSLEAF_FAIL_TIMEOUT", "Time expired before operation completed"),
    (-3, "EV2CITRUSLEAF_FAIL_THROTTLED", "Async communication buffer full"),
    (1, "EV2CITRUSLEAF_FAIL_UNKNOWN", "Unknown failure on the server side"),
    (2, "EV2CITRUSLEAF_FAIL_NOTFOUND", "Key not found in database"),
    (3, "EV2CITRUSLEAF_FAIL_GENERATION", "Generation mismatch"),
    (4, "EV2CITRUSLEAF_FAIL_PARAMETER", "Caller passed in bad parameters"),
    (5, "EV2CITRUSLEAF_FAIL_KEY_EXISTS", "Cannot replace key, check unique parameter"),
    (6, "EV2CITRUSLEAF_FAIL_BIN_EXISTS", "Cannot overwrite bin, check unique_bin parameter"),
    (7, "EV2CITRUSLEAF_FAIL_CLUSTER_KEY_MISMATCH", "Cluster key mismatch"),
    (8, "EV2CITRUSLEAF_FAIL_PARTITION_OUT_OF_SPACE", "Partition out of space"),
    (9, "EV2CITRUSLEAF_FAIL_SERVERSIDE_TIMEOUT", "Server timeout expired"),
    (10, "EV2CITRUSLEAF_FAIL_NOXDS", "Cross Data Replication (XDR) error"),
    (11, "EV2CITRUSLEAF_FAIL_UNAVAILABLE", "Node unavailable"),
    (12, "EV2CITRUSLEAF_FAIL_INCOMPATIBLE_TYPE", "Operation cannot be applied to that type"),
    (13, "EV2CITRUSLEAF_FAIL_RECORD_TOO_BIG", "Record too big"),
    (14, "EV2CITRUSLEAF_FAIL_KEY_BUSY", "Key locked by another"),
];

/// Look up the (name, message) pair for a code.
pub fn describe(code: i32) -> Option<(&'static str, &'static str)> {
    TABLE
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, msg)| (*name, *msg))
}

/// Format a code as the text handed to completion callbacks.
pub fn format_code(code: i32) -> String {
    match describe(code) {
        Some((name, msg)) => format!("Error Type: {}, Message: {}", name, msg),
        None => format!("Error Type: UNKNOWN({}), Message: Unrecognized return code", code),
    }
}

/// How the dispatcher treats the return code of a submitted native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitCode {
    /// Accepted by the native library.
    Accepted,
    /// Backend buffer exhaustion: put the item back and stop this pass.
    Throttled,
    /// Client-side resource failure (e.g. allocation).
    ClientError,
    /// Anything else non-zero: logged and ignored.
    Other(i32),
}

impl SubmitCode {
    #[inline]
    pub fn classify(code: i32) -> Self {
        match code {
            OK => SubmitCode::Accepted,
            FAIL_THROTTLED => SubmitCode::Throttled,
            FAIL_CLIENT_ERROR => SubmitCode::ClientError,
            other => SubmitCode::Other(other),
        }
    }
}
