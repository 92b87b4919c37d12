//! Per-context handle registry
//!
//! Each execution context owns one [`Registry`]: ordered maps from handle
//! identifier to connection, statement, and large-object records. The
//! registry only does bookkeeping — driver calls and teardown ordering are
//! orchestrated by the context layer, which also consults the process-wide
//! [`SharedConnectionMap`](crate::shared::SharedConnectionMap) when a
//! connection lookup misses locally (the adoption protocol).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;

use crate::config::{ConnectionOptions, FailoverPolicy};
use crate::driver::{DriverConnection, DriverLob, DriverPool, DriverStatement};
use crate::failover::{FailoverCallback, Mailbox};
use crate::handle::{next_handle_id, HandleKind, StatusBlock};
use crate::shared::SharedConnectionMap;

/// Process-unique statement identity.
///
/// Async execution records are keyed by this token rather than by the
/// handle string, so statements from different contexts can never collide
/// in the process-wide async table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtToken(u64);

static STMT_TOKEN_COUNTER: AtomicU64 = AtomicU64::new(1);

impl StmtToken {
    fn next() -> Self {
        StmtToken(STMT_TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn new_for_test() -> Self {
        Self::next()
    }
}

/// A registered connection
pub struct ConnectionRecord {
    /// Handle identifier
    pub id: String,
    /// Diagnostic state
    pub status: StatusBlock,
    /// Tuning options
    pub options: ConnectionOptions,
    /// Failover policy
    pub failover: FailoverPolicy,
    pub(crate) conn: Arc<dyn DriverConnection>,
    pub(crate) pool: Option<Arc<dyn DriverPool>>,
    // Owners close the driver connection on teardown; adopters only drop
    // their cloned reference.
    pub(crate) owner_close: bool,
    pub(crate) owner_mailbox: Option<Arc<Mailbox>>,
    pub(crate) callback: Option<FailoverCallback>,
    pub(crate) fo_pending: Option<String>,
    pub(crate) fo_deadline: Option<Instant>,
}

impl ConnectionRecord {
    /// The underlying driver connection
    pub fn driver(&self) -> &Arc<dyn DriverConnection> {
        &self.conn
    }

    /// Whether this record owns the driver connection's close
    pub fn is_owner(&self) -> bool {
        self.owner_close
    }
}

/// A registered statement
pub struct StatementRecord {
    /// Handle identifier
    pub id: String,
    /// Diagnostic state
    pub status: StatusBlock,
    /// Rows fetched per round trip for this statement
    pub fetch_array_size: u32,
    pub(crate) conn_id: String,
    pub(crate) conn: Arc<dyn DriverConnection>,
    pub(crate) stmt: Option<Arc<dyn DriverStatement>>,
    pub(crate) defined: bool,
    pub(crate) token: StmtToken,
}

impl StatementRecord {
    /// Handle identifier of the owning connection
    pub fn connection_id(&self) -> &str {
        &self.conn_id
    }

    /// Whether a driver statement is currently installed
    pub fn is_prepared(&self) -> bool {
        self.stmt.is_some()
    }

    /// Whether output columns have been defined for the current result set
    pub fn is_defined(&self) -> bool {
        self.defined
    }

    /// The statement's async-table identity
    pub fn token(&self) -> StmtToken {
        self.token
    }
}

/// A registered large object
pub struct LobRecord {
    /// Handle identifier
    pub id: String,
    /// Diagnostic state
    pub status: StatusBlock,
    pub(crate) lob: Arc<dyn DriverLob>,
}

/// Handle maps for one execution context
#[derive(Default)]
pub struct Registry {
    conns: IndexMap<String, ConnectionRecord>,
    stmts: IndexMap<String, StatementRecord>,
    lobs: IndexMap<String, LobRecord>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection created by this context. The caller publishes
    /// it to the shared map and owns the eventual close.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn insert_connection(
        &mut self,
        conn: Arc<dyn DriverConnection>,
        pool: Option<Arc<dyn DriverPool>>,
        options: ConnectionOptions,
        failover: FailoverPolicy,
        callback: Option<FailoverCallback>,
        owner_mailbox: Arc<Mailbox>,
    ) -> String {
        let id = next_handle_id(HandleKind::Connection);
        self.conns.insert(
            id.clone(),
            ConnectionRecord {
                id: id.clone(),
                status: StatusBlock::default(),
                options,
                failover,
                conn,
                pool,
                owner_close: true,
                owner_mailbox: Some(owner_mailbox),
                callback,
                fo_pending: None,
                fo_deadline: None,
            },
        );
        id
    }

    /// Register a non-owning record for a connection published elsewhere.
    /// Adopted records get default options and never carry a callback.
    fn adopt_connection(&mut self, id: &str, conn: Arc<dyn DriverConnection>) {
        self.conns.insert(
            id.to_string(),
            ConnectionRecord {
                id: id.to_string(),
                status: StatusBlock::default(),
                options: ConnectionOptions::default(),
                failover: FailoverPolicy::default(),
                conn,
                pool: None,
                owner_close: false,
                owner_mailbox: None,
                callback: None,
                fo_pending: None,
                fo_deadline: None,
            },
        );
    }

    /// Look up a connection, falling back to shared-map adoption on a local
    /// miss. Returns `None` when the identifier is unknown or its owner is
    /// already closing.
    pub fn lookup_connection(
        &mut self,
        id: &str,
        shared: &SharedConnectionMap,
    ) -> Option<&mut ConnectionRecord> {
        if !self.conns.contains_key(id) {
            let (conn, owner_alive) = shared.lookup(id)?;
            if !owner_alive {
                return None;
            }
            tracing::debug!(conn = id, "adopting shared connection");
            self.adopt_connection(id, conn);
        }
        self.conns.get_mut(id)
    }

    /// Local-only connection lookup
    pub fn connection(&self, id: &str) -> Option<&ConnectionRecord> {
        self.conns.get(id)
    }

    /// Local-only mutable connection lookup
    pub fn connection_mut(&mut self, id: &str) -> Option<&mut ConnectionRecord> {
        self.conns.get_mut(id)
    }

    pub(crate) fn remove_connection(&mut self, id: &str) -> Option<ConnectionRecord> {
        self.conns.shift_remove(id)
    }

    /// Register an empty statement belonging to the given connection.
    /// Returns `None` when the connection is not registered locally.
    pub(crate) fn insert_statement(&mut self, conn_id: &str) -> Option<String> {
        let (conn, fetch_array_size) = {
            let rec = self.conns.get(conn_id)?;
            (Arc::clone(&rec.conn), rec.options.fetch_array_size)
        };
        let id = next_handle_id(HandleKind::Statement);
        self.stmts.insert(
            id.clone(),
            StatementRecord {
                id: id.clone(),
                status: StatusBlock::default(),
                fetch_array_size,
                conn_id: conn_id.to_string(),
                conn,
                stmt: None,
                defined: false,
                token: StmtToken::next(),
            },
        );
        Some(id)
    }

    /// Statement lookup
    pub fn statement(&self, id: &str) -> Option<&StatementRecord> {
        self.stmts.get(id)
    }

    /// Mutable statement lookup
    pub fn statement_mut(&mut self, id: &str) -> Option<&mut StatementRecord> {
        self.stmts.get_mut(id)
    }

    pub(crate) fn remove_statement(&mut self, id: &str) -> Option<StatementRecord> {
        self.stmts.shift_remove(id)
    }

    /// Register a large object
    pub(crate) fn insert_lob(&mut self, lob: Arc<dyn DriverLob>) -> String {
        let id = next_handle_id(HandleKind::LargeObject);
        self.lobs.insert(
            id.clone(),
            LobRecord {
                id: id.clone(),
                status: StatusBlock::default(),
                lob,
            },
        );
        id
    }

    /// Large-object lookup
    pub fn lob(&self, id: &str) -> Option<&LobRecord> {
        self.lobs.get(id)
    }

    pub(crate) fn remove_lob(&mut self, id: &str) -> Option<LobRecord> {
        self.lobs.shift_remove(id)
    }

    /// Identifiers of all registered connections, in insertion order
    pub fn connection_ids(&self) -> Vec<String> {
        self.conns.keys().cloned().collect()
    }

    /// Identifiers of all registered statements, in insertion order
    pub fn statement_ids(&self) -> Vec<String> {
        self.stmts.keys().cloned().collect()
    }

    /// Identifiers of all registered large objects, in insertion order
    pub fn lob_ids(&self) -> Vec<String> {
        self.lobs.keys().cloned().collect()
    }

    pub(crate) fn connections_mut(&mut self) -> impl Iterator<Item = &mut ConnectionRecord> {
        self.conns.values_mut()
    }

    /// Status block of any handle kind, if registered
    pub fn status(&self, id: &str) -> Option<&StatusBlock> {
        if let Some(rec) = self.conns.get(id) {
            return Some(&rec.status);
        }
        if let Some(rec) = self.stmts.get(id) {
            return Some(&rec.status);
        }
        self.lobs.get(id).map(|rec| &rec.status)
    }

    /// Total number of registered handles
    pub fn len(&self) -> usize {
        self.conns.len() + self.stmts.len() + self.lobs.len()
    }

    /// Whether no handles are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
