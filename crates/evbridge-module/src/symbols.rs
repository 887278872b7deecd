//! Function names and argument layouts of the non-blocking v2 library.
//!
//! Every function takes a `CallFrame`. Buffers are listed in frame order;
//! `ints` hold scalars. Functions marked *async* report through the
//! frame's completion handler and return a submission code; the others
//! return their result code directly.
//!
//! | Function            | Buffers                                | Ints      | Async |
//! |---------------------|----------------------------------------|-----------|-------|
//! | `init`              | -                                      | -         | no    |
//! | `cluster_create`    | -                                      | -         | no    |
//! | `cluster_add_host`  | host                                   | port      | no    |
//! | `cluster_destroy`   | -                                      | -         | no    |
//! | `active_node_count` | -                                      | -         | no    |
//! | `calculate_digest`  | set, key                               | -         | no    |
//! | `get_log_level`     | -                                      | -         | no    |
//! | `set_log_level`     | -                                      | level     | no    |
//! | `shutdown`          | -                                      | -         | no    |
//! | `get_all`           | ns, set, key                           | -         | yes   |
//! | `get`               | ns, set, key, bin names...             | bin count | yes   |
//! | `put`               | ns, set, key, params, (name, value)... | bin count | yes   |
//! | `delete`            | ns, set, key, params                   | -         | yes   |
//! | `get_all_digest`    | ns, digest                             | -         | yes   |
//! | `delete_digest`     | ns, digest, params                     | -         | yes   |
//! | `info`              | host                                   | port      | yes   |
//!
//! An empty `params` buffer means "no write parameters".
//!
//! Two synchronous functions return a value instead of a result code:
//! `active_node_count` returns the node count (negative on failure) and
//! `get_log_level` returns the level. `calculate_digest` completes the
//! frame synchronously with the 20 digest bytes as its response, then
//! returns its result code.

pub const INIT: &str = "init";
pub const CLUSTER_CREATE: &str = "cluster_create";
pub const CLUSTER_ADD_HOST: &str = "cluster_add_host";
pub const CLUSTER_DESTROY: &str = "cluster_destroy";
pub const SHUTDOWN: &str = "shutdown";
pub const ACTIVE_NODE_COUNT: &str = "active_node_count";
pub const CALCULATE_DIGEST: &str = "calculate_digest";
pub const GET_LOG_LEVEL: &str = "get_log_level";
pub const SET_LOG_LEVEL: &str = "set_log_level";
pub const GET_ALL: &str = "get_all";
pub const GET: &str = "get";
pub const PUT: &str = "put";
pub const DELETE: &str = "delete";
pub const GET_ALL_DIGEST: &str = "get_all_digest";
pub const DELETE_DIGEST: &str = "delete_digest";
pub const INFO: &str = "info";

/// Everything a v2 non-blocking client links against.
pub const V2_NONBLOCKING: &[&str] = &[
    INIT,
    CLUSTER_CREATE,
    CLUSTER_ADD_HOST,
    CLUSTER_DESTROY,
    SHUTDOWN,
    ACTIVE_NODE_COUNT,
    CALCULATE_DIGEST,
    GET_LOG_LEVEL,
    SET_LOG_LEVEL,
    GET_ALL,
    GET,
    PUT,
    DELETE,
    GET_ALL_DIGEST,
    DELETE_DIGEST,
    INFO,
];

/// Length of a record digest.
pub const DIGEST_LEN: usize = 20;
