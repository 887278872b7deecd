//! Library defaults for the client.

/// Cap on the uid free list.
pub const MAX_OBJECT_POOL_SIZE: usize = 4096;

/// Uids minted up front.
pub const INITIAL_POOL_SIZE: usize = 1024;

/// Idle native handles kept per kind.
pub const POOL_CAPACITY: usize = 1000;

/// Per-call timeout handed to the backend.
pub const TIMEOUT_MS: u32 = 1000;

/// Extra time a blocking call waits past the backend timeout.
pub const BLOCKING_GRACE_MS: u64 = 1000;

/// Native library logging stays on after connect.
pub const NATIVE_LOGGING: bool = false;
