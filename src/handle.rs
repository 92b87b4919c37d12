//! Handle identifiers and per-handle status blocks
//!
//! Every registry record is addressed by an opaque string handle of the
//! form `<prefix><n>`, where the prefix is distinct per handle kind and `n`
//! comes from a single process-wide counter, so identifiers are unique
//! across kinds and across execution contexts.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::driver::{DriverError, StatementClass};

/// Kind of resource a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// A database connection
    Connection,
    /// A SQL statement
    Statement,
    /// A large-object locator
    LargeObject,
}

impl HandleKind {
    /// Identifier prefix for this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            HandleKind::Connection => "conn",
            HandleKind::Statement => "stmt",
            HandleKind::LargeObject => "lob",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Connection => write!(f, "connection"),
            HandleKind::Statement => write!(f, "statement"),
            HandleKind::LargeObject => write!(f, "large-object"),
        }
    }
}

// One counter for all kinds keeps identifiers process-unique even when the
// prefixes are stripped by sloppy host scripts.
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate the next handle identifier for the given kind
pub fn next_handle_id(kind: HandleKind) -> String {
    let n = HANDLE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}{}", kind.prefix(), n)
}

/// Diagnostic state attached to every handle.
///
/// Operations record their outcome here so the host can inspect what
/// happened to a handle after the fact, independently of the return value
/// of the call that produced it.
#[derive(Debug, Clone, Default)]
pub struct StatusBlock {
    /// Last return code
    pub rc: i32,
    /// Driver function or engine operation that produced the last outcome
    pub function: Option<String>,
    /// Last error text
    pub error: Option<String>,
    /// Five-character SQL state of the last driver error
    pub sql_state: Option<String>,
    /// Rows affected by the last execute
    pub rows: u64,
    /// Statement classification (statements only)
    pub class: StatementClass,
    /// Numeric code of the last driver error
    pub code: i32,
    /// Whether the last failure was flagged recoverable
    pub recoverable: bool,
    /// Whether the last call completed with a warning
    pub warning: bool,
    /// Parse offset of the last driver error
    pub offset: u32,
}

impl StatusBlock {
    /// Reset everything except the statement classification
    pub fn clear(&mut self) {
        let class = self.class;
        *self = StatusBlock::default();
        self.class = class;
    }

    /// Record an engine-level (non-driver) failure
    pub fn set_error(&mut self, function: &str, code: i32, message: impl Into<String>) {
        self.rc = code;
        self.code = code;
        self.function = Some(function.to_string());
        self.error = Some(message.into());
        self.sql_state = None;
        self.recoverable = false;
        self.warning = false;
        self.offset = 0;
    }

    /// Record a structured driver failure
    pub fn set_driver_error(&mut self, function: &str, err: &DriverError) {
        self.rc = if err.code != 0 { err.code } else { -1 };
        self.code = err.code;
        self.function = Some(function.to_string());
        self.error = Some(err.message.clone());
        self.sql_state = if err.sql_state.is_empty() {
            None
        } else {
            Some(err.sql_state.clone())
        };
        self.recoverable = err.recoverable;
        self.warning = err.warning;
        self.offset = err.offset;
    }

    /// Record a successful outcome with an affected-row count
    pub fn record_rows(&mut self, rows: u64) {
        self.rc = 0;
        self.code = 0;
        self.error = None;
        self.recoverable = false;
        self.rows = rows;
    }
}
