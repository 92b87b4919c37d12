#![warn(missing_docs)]

//! # orabridge
//!
//! The concurrency and lifecycle core of a handle-based Oracle driver
//! bridge for scripting hosts. The bridge exposes database access to a
//! host language through opaque string handles (connect, prepare, bind,
//! execute, fetch, commit); this crate implements the engine underneath
//! that surface:
//!
//! - **Handle registry** — per-context maps from handle identifier to
//!   connection/statement/large-object records, with ordered teardown.
//! - **Connection sharing** — a connection opened in one context can be
//!   adopted read-only (reference-counted) by another context in the same
//!   process; only the owner ever closes it.
//! - **Asynchronous execution** — one worker thread per in-flight
//!   statement execution, with non-blocking start, timed waits that report
//!   a distinguished "still processing" status, cooperative cancellation,
//!   and exactly-once join.
//! - **Failover notifications** — recoverable driver errors are routed to
//!   the connection's owning context through a mailbox and coalesced
//!   within a debounce window, so host callbacks run only on their own
//!   thread and are not stormed by repeated transient failures.
//! - **Pending-resource tracking** — bound variables and temporary large
//!   objects live exactly as long as the bind/execute cycle that created
//!   them.
//!
//! The database driver itself is an external collaborator behind the
//! object-safe traits in [`driver`]; this crate performs no I/O of its
//! own.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use orabridge::{
//!     AsyncTable, ConnectionOptions, ExecutionContext, FailoverPolicy,
//!     SharedConnectionMap,
//! };
//!
//! # fn open_driver_connection() -> Arc<dyn orabridge::DriverConnection> { unimplemented!() }
//! # fn main() -> orabridge::Result<()> {
//! // Process-wide state, shared by every execution context.
//! let shared = Arc::new(SharedConnectionMap::new());
//! let asyncs = Arc::new(AsyncTable::new());
//!
//! let mut ctx = ExecutionContext::new(Arc::clone(&shared), Arc::clone(&asyncs));
//!
//! let conn = ctx.connect(
//!     open_driver_connection(),
//!     None,
//!     ConnectionOptions::new().with_autocommit(true),
//!     FailoverPolicy::new(),
//!     None,
//! );
//!
//! let stmt = ctx.open_statement(&conn)?;
//! ctx.prepare(&stmt, "UPDATE accounts SET balance = balance - 50")?;
//!
//! // Execute on a worker thread; poll with a timeout.
//! ctx.start_async(&stmt, false)?;
//! let rc = ctx.wait_async(&stmt, Some(Duration::from_secs(5)))?;
//! if rc == 0 {
//!     let rows = ctx.status(&stmt).map(|s| s.rows).unwrap_or(0);
//!     println!("updated {rows} rows");
//! }
//!
//! ctx.close_statement(&stmt)?;
//! ctx.close_connection(&conn)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Threading Model
//!
//! Registry and context operations run on the host's calling thread and
//! may block on driver I/O. Each asynchronous execution gets its own
//! worker thread, created on demand and joined when the result is
//! consumed; there is no thread pool. The async table, the shared
//! connection map, and the handle counter each have their own lock, held
//! only for bookkeeping and never across a driver call.

pub mod asyncexec;
pub mod config;
pub mod constants;
pub mod context;
pub mod driver;
pub mod error;
pub mod failover;
pub mod handle;
pub mod pending;
pub mod registry;
pub mod shared;

// Re-export commonly used types
pub use asyncexec::{AsyncTable, Completion, WaitStatus};
pub use config::{ConnectionOptions, FailoverPolicy};
pub use context::ExecutionContext;
pub use driver::{
    resolve_exec_mode, DriverConnection, DriverError, DriverLob, DriverPool, DriverResult,
    DriverStatement, PendingResource, StatementClass, StatementInfo,
};
pub use error::{Error, Result};
pub use failover::{FailoverCallback, FailoverEvent, Mailbox, RECOVERABLE_TAG};
pub use handle::{next_handle_id, HandleKind, StatusBlock};
pub use pending::PendingResources;
pub use registry::{ConnectionRecord, LobRecord, Registry, StatementRecord, StmtToken};
pub use shared::SharedConnectionMap;
