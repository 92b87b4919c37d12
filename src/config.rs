//! Connection options and failover policy
//!
//! Plain property storage: the engine records these values and hands them
//! to whichever layer needs them (the async engine reads the autocommit
//! flag, the failover channel reads the debounce window). Builder-style
//! setters so hosts can chain configuration.

use std::time::Duration;

use crate::constants::{
    DEFAULT_FETCH_ARRAY_SIZE, DEFAULT_FO_DEBOUNCE_MS, DEFAULT_PREFETCH_ROWS,
};

/// Per-connection tuning recorded on the connection record
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Commit automatically after data-modifying statements
    pub autocommit: bool,
    /// Driver-side statement cache size (0 = disabled)
    pub stmt_cache_size: u32,
    /// Rows fetched per round trip
    pub fetch_array_size: u32,
    /// Rows prefetched with an execute
    pub prefetch_rows: u32,
    /// Prefetch memory limit in bytes (0 = driver default)
    pub prefetch_memory: u32,
    /// Per-call timeout in milliseconds (0 = none)
    pub call_timeout_ms: u32,
    /// Materialize large-object columns inline instead of returning locators
    pub inline_lobs: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            autocommit: false,
            stmt_cache_size: 0,
            fetch_array_size: DEFAULT_FETCH_ARRAY_SIZE,
            prefetch_rows: DEFAULT_PREFETCH_ROWS,
            prefetch_memory: 0,
            call_timeout_ms: 0,
            inline_lobs: false,
        }
    }
}

impl ConnectionOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the autocommit flag
    pub fn with_autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    /// Set the fetch array size (values below 1 fall back to the default)
    pub fn with_fetch_array_size(mut self, rows: u32) -> Self {
        self.fetch_array_size = if rows > 0 {
            rows
        } else {
            DEFAULT_FETCH_ARRAY_SIZE
        };
        self
    }

    /// Set the prefetch row count
    pub fn with_prefetch_rows(mut self, rows: u32) -> Self {
        self.prefetch_rows = rows;
        self
    }

    /// Set the statement cache size
    pub fn with_stmt_cache_size(mut self, size: u32) -> Self {
        self.stmt_cache_size = size;
        self
    }

    /// Enable or disable inline large-object materialization
    pub fn with_inline_lobs(mut self, inline: bool) -> Self {
        self.inline_lobs = inline;
        self
    }
}

/// Reconnection/failover policy for a connection.
///
/// `max_attempts == 0` disables driver-side retry; the debounce window
/// still applies to failure notifications so the host callback is not
/// stormed during repeated transient errors.
#[derive(Debug, Clone)]
pub struct FailoverPolicy {
    /// Maximum reconnection attempts (0 = disabled)
    pub max_attempts: u32,
    /// Base delay between attempts
    pub backoff: Duration,
    /// Multiplier applied to the delay after each attempt
    pub backoff_factor: f64,
    /// Bitset of [`fo_class`](crate::constants::fo_class) error classes the
    /// policy applies to
    pub error_classes: u32,
    /// Window during which repeated failure notifications coalesce into one
    /// callback invocation
    pub debounce: Duration,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff: Duration::ZERO,
            backoff_factor: 1.0,
            error_classes: 0,
            debounce: Duration::from_millis(DEFAULT_FO_DEBOUNCE_MS),
        }
    }
}

impl FailoverPolicy {
    /// Create a policy with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum attempt count
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the base backoff delay
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the subscribed error classes
    pub fn with_error_classes(mut self, classes: u32) -> Self {
        self.error_classes = classes;
        self
    }

    /// Set the notification debounce window
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Whether the policy covers any of the given error classes
    pub fn applies_to(&self, classes: u32) -> bool {
        self.error_classes & classes != 0
    }

    /// Delay before the given retry attempt (0-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.backoff_factor <= 1.0 {
            return self.backoff;
        }
        self.backoff.mul_f64(self.backoff_factor.powi(attempt as i32))
    }
}
