//! Driver capability contract
//!
//! The engine never talks to a database itself; it drives an external
//! driver through the object-safe traits in this module. Reference counting
//! on driver objects maps onto `Arc`: cloning a handle is an add-ref,
//! dropping the last clone releases the underlying driver resource.
//!
//! Trait methods that cross into the driver return [`DriverResult`], whose
//! error side carries the driver's structured last-error descriptor.

use std::fmt;
use std::sync::Arc;

use crate::constants::exec_mode;

/// Structured error descriptor retrieved from the driver after a failed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    /// Numeric driver error code
    pub code: i32,
    /// Human-readable message
    pub message: String,
    /// Five-character SQL state, if the driver supplies one
    pub sql_state: String,
    /// Byte offset into the SQL text where parsing failed, if applicable
    pub offset: u32,
    /// Whether the failure is safe to retry after reconnection/failover
    pub recoverable: bool,
    /// Whether the call succeeded with a warning
    pub warning: bool,
}

impl DriverError {
    /// Create an error with just a code and message
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            sql_state: String::new(),
            offset: 0,
            recoverable: false,
            warning: false,
        }
    }

    /// Mark this error as recoverable
    pub fn recoverable(mut self) -> Self {
        self.recoverable = true;
        self
    }

    /// Attach a SQL state
    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = sql_state.into();
        self
    }

    /// Attach a parse offset
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code > 0 {
            write!(f, "ORA-{:05}: {}", self.code, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

/// Result type for calls that cross into the driver
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Statement classification determined by the driver at prepare time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatementClass {
    /// Unknown or not yet prepared
    #[default]
    Unknown,
    /// SELECT query
    Query,
    /// PL/SQL block: BEGIN, DECLARE, CALL
    PlSql,
    /// DML: INSERT, UPDATE, DELETE, MERGE
    Dml,
    /// DDL: CREATE, ALTER, DROP, etc.
    Ddl,
    /// DML with a RETURNING clause
    Returning,
}

/// Statement metadata reported by the driver after prepare
#[derive(Debug, Clone, Copy, Default)]
#[allow(missing_docs)]
pub struct StatementInfo {
    pub is_query: bool,
    pub is_plsql: bool,
    pub is_dml: bool,
    pub is_ddl: bool,
    pub is_returning: bool,
}

impl StatementInfo {
    /// Collapse the driver flags into a single classification
    pub fn class(&self) -> StatementClass {
        if self.is_query {
            StatementClass::Query
        } else if self.is_plsql {
            StatementClass::PlSql
        } else if self.is_dml {
            StatementClass::Dml
        } else if self.is_ddl {
            StatementClass::Ddl
        } else if self.is_returning {
            StatementClass::Returning
        } else {
            StatementClass::Unknown
        }
    }
}

/// Compute the execution-mode bits for an execute call.
///
/// A commit rider is added when the caller asked for one explicitly, or when
/// the connection is in autocommit mode and the statement actually modifies
/// data (DML or PL/SQL). Without statement metadata the mode stays default.
pub fn resolve_exec_mode(
    commit_requested: bool,
    autocommit: bool,
    info: Option<&StatementInfo>,
) -> u32 {
    let mut mode = exec_mode::DEFAULT;
    if let Some(info) = info {
        if commit_requested || (autocommit && (info.is_dml || info.is_plsql)) {
            mode |= exec_mode::COMMIT_ON_SUCCESS;
        }
    }
    mode
}

/// A live driver connection.
///
/// Implementations must be callable from any thread: the async execution
/// engine invokes [`DriverConnection::interrupt`] from the caller's thread
/// while a worker is blocked inside an execute call on the same connection.
pub trait DriverConnection: Send + Sync {
    /// Parse SQL text and return a driver statement bound to this connection
    fn prepare(&self, sql: &str) -> DriverResult<Arc<dyn DriverStatement>>;

    /// Commit the current transaction
    fn commit(&self) -> DriverResult<()>;

    /// Roll back the current transaction
    fn rollback(&self) -> DriverResult<()>;

    /// Ask the driver to abort the call currently executing on this
    /// connection. Cooperative: the blocked call returns with an error.
    fn interrupt(&self) -> DriverResult<()>;

    /// Round-trip health check
    fn ping(&self) -> DriverResult<()>;

    /// Hard-close the connection. Only the owning context calls this;
    /// adopters just drop their reference.
    fn close(&self) -> DriverResult<()>;
}

/// A prepared driver statement
pub trait DriverStatement: Send + Sync {
    /// Execute the statement, returning the affected-row count.
    /// `mode` is a bitset of [`exec_mode`](crate::constants::exec_mode) bits.
    fn execute(&self, mode: u32) -> DriverResult<u64>;

    /// Execute the statement once per bound iteration (array DML)
    fn execute_batch(&self, mode: u32, iterations: u32) -> DriverResult<u64>;

    /// Statement metadata, available after prepare
    fn info(&self) -> DriverResult<StatementInfo>;

    /// Close the server-side cursor
    fn close(&self) -> DriverResult<()>;
}

/// A driver session pool
pub trait DriverPool: Send + Sync {
    /// Acquire a connection from the pool
    fn acquire(&self) -> DriverResult<Arc<dyn DriverConnection>>;

    /// Close the pool
    fn close(&self) -> DriverResult<()>;
}

/// A driver large-object locator
pub trait DriverLob: Send + Sync {
    /// Close the large object
    fn close(&self) -> DriverResult<()>;
}

/// A driver resource whose lifetime is controlled by the pending tracker:
/// bound variables and temporary LOBs created during a bind cycle. The
/// resource is released when its last `Arc` clone is dropped.
pub trait PendingResource: Send + Sync {}
