//! Error types for the driver bridge
//!
//! This module defines the errors the engine itself produces, plus the
//! wrapper carrying structured driver failures out to the host. Driver
//! errors captured inside an async worker are never propagated across the
//! thread boundary; they are stored on the execution record and surface
//! here only when a wait consumes them.

use thiserror::Error;

use crate::driver::DriverError;
use crate::handle::HandleKind;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the driver bridge
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Handle Errors
    // =========================================================================
    /// Caller supplied an identifier not present in the registry or shared map
    #[error("invalid {kind} handle: {id}")]
    InvalidHandle {
        /// Kind of handle that was looked up
        kind: HandleKind,
        /// The identifier that failed to resolve
        id: String,
    },

    /// Operation requires a prepared statement
    #[error("statement is not prepared")]
    StatementNotPrepared,

    // =========================================================================
    // Async Execution Errors
    // =========================================================================
    /// A second asynchronous execution was started on a statement that
    /// already has one outstanding
    #[error("statement already executing asynchronously")]
    AlreadyExecuting,

    /// The worker thread could not be created; all references taken for the
    /// execution have been unwound
    #[error("failed to create async worker thread: {0}")]
    WorkerSpawn(std::io::Error),

    // =========================================================================
    // Driver Errors
    // =========================================================================
    /// Structured failure reported by the external driver
    #[error("{0}")]
    Driver(DriverError),
}

impl Error {
    /// Convenience for invalid-handle errors
    pub fn invalid_handle(kind: HandleKind, id: impl Into<String>) -> Self {
        Error::InvalidHandle {
            kind,
            id: id.into(),
        }
    }

    /// Check if this is an invalid-handle error
    pub fn is_invalid_handle(&self) -> bool {
        matches!(self, Error::InvalidHandle { .. })
    }

    /// Check if this error is recoverable (safe to retry after failover)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Driver(e) if e.recoverable)
    }

    /// The driver error carried by this error, if any
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Error::Driver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DriverError> for Error {
    fn from(err: DriverError) -> Self {
        Error::Driver(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_handle_display() {
        let err = Error::invalid_handle(HandleKind::Statement, "stmt42");
        assert_eq!(err.to_string(), "invalid statement handle: stmt42");
        assert!(err.is_invalid_handle());
    }

    #[test]
    fn test_driver_error_passthrough() {
        let err: Error = DriverError::new(1013, "user requested cancel").into();
        assert_eq!(err.to_string(), "ORA-01013: user requested cancel");
        assert!(!err.is_recoverable());
        assert_eq!(err.driver_error().unwrap().code, 1013);
    }

    #[test]
    fn test_recoverable_flag() {
        let err: Error = DriverError::new(3113, "end-of-file on channel")
            .recoverable()
            .into();
        assert!(err.is_recoverable());
    }
}
