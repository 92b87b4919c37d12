//! Engine-wide constants
//!
//! Result codes, execution-mode bits, and tuning defaults shared by the
//! registry, the async execution engine, and the failover channel.

// =============================================================================
// Result Codes
// =============================================================================

/// Result codes returned by execute/wait operations
#[allow(missing_docs)]
pub mod result_code {
    /// Operation completed successfully
    pub const SUCCESS: i32 = 0;

    /// Operation failed; details are on the handle's status block
    pub const GENERIC_FAILURE: i32 = -1;

    /// A timed wait expired while the asynchronous execution is still
    /// running; the worker has not been joined and a later wait must reap it
    pub const STILL_PROCESSING: i32 = -3123;
}

// =============================================================================
// Execution Modes
// =============================================================================

/// Execution-mode bits passed to the driver's execute primitive
#[allow(missing_docs)]
pub mod exec_mode {
    pub const DEFAULT: u32 = 0x0000;
    /// Commit the transaction when the execute call succeeds
    pub const COMMIT_ON_SUCCESS: u32 = 0x0020;
}

// =============================================================================
// Failover Error Classes
// =============================================================================

/// Error-class bits a failover policy can subscribe to
#[allow(missing_docs)]
pub mod fo_class {
    /// Transient network failures
    pub const NETWORK: u32 = 0x01;
    /// Lost or killed sessions
    pub const CONN_LOST: u32 = 0x02;
}

// =============================================================================
// Defaults
// =============================================================================

/// Default number of rows fetched per round trip
pub const DEFAULT_FETCH_ARRAY_SIZE: u32 = 100;

/// Default number of rows the driver prefetches with an execute
pub const DEFAULT_PREFETCH_ROWS: u32 = 2;

/// Default debounce window for coalescing failover notifications
pub const DEFAULT_FO_DEBOUNCE_MS: u64 = 250;

/// Interval at which a non-joining waiter polls for record removal
pub(crate) const REAP_POLL_MS: u64 = 5;
