//! Execution contexts
//!
//! An [`ExecutionContext`] is the unit the scripting host works with: it
//! owns a handle [`Registry`], a pending-resource tracker, and a failover
//! [`Mailbox`], and shares the process-wide [`SharedConnectionMap`] and
//! [`AsyncTable`] with every other context. All methods here run on the
//! host's calling thread and may block on driver I/O; the only other
//! threads in play are the async execution workers.
//!
//! # Example
//!
//! ```ignore
//! let shared = Arc::new(SharedConnectionMap::new());
//! let asyncs = Arc::new(AsyncTable::new());
//! let mut ctx = ExecutionContext::new(shared, asyncs);
//!
//! let conn = ctx.connect(driver_conn, None, ConnectionOptions::new(), FailoverPolicy::new(), None);
//! let stmt = ctx.open_statement(&conn)?;
//! ctx.prepare(&stmt, "UPDATE accounts SET balance = 0")?;
//! ctx.start_async(&stmt, false)?;
//! let rc = ctx.wait_async(&stmt, Some(Duration::from_secs(5)))?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::asyncexec::{AsyncTable, WaitStatus};
use crate::config::{ConnectionOptions, FailoverPolicy};
use crate::constants::result_code;
use crate::driver::{
    resolve_exec_mode, DriverConnection, DriverError, DriverLob, DriverPool, PendingResource,
};
use crate::error::{Error, Result};
use crate::failover::{FailoverCallback, FailoverEvent, Mailbox, RECOVERABLE_TAG};
use crate::handle::{HandleKind, StatusBlock};
use crate::pending::PendingResources;
use crate::registry::Registry;
use crate::shared::SharedConnectionMap;

static CONTEXT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// One script execution context: handle registry, pending-resource
/// tracking, and the mailbox recoverable-error notifications arrive on
pub struct ExecutionContext {
    id: u64,
    registry: Registry,
    pendings: PendingResources,
    mailbox: Arc<Mailbox>,
    shared: Arc<SharedConnectionMap>,
    asyncs: Arc<AsyncTable>,
}

impl ExecutionContext {
    /// Create a context sharing the given process-wide maps
    pub fn new(shared: Arc<SharedConnectionMap>, asyncs: Arc<AsyncTable>) -> Self {
        Self {
            id: CONTEXT_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            registry: Registry::new(),
            pendings: PendingResources::new(),
            mailbox: Arc::new(Mailbox::new()),
            shared,
            asyncs,
        }
    }

    /// Process-unique context identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The context's failover mailbox
    pub fn mailbox(&self) -> Arc<Mailbox> {
        Arc::clone(&self.mailbox)
    }

    /// The context's handle registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Status block of any registered handle
    pub fn status(&self, handle_id: &str) -> Option<&StatusBlock> {
        self.registry.status(handle_id)
    }

    /// Number of pending resources tracked for a statement
    pub fn pending_count(&self, stmt_id: &str) -> usize {
        self.pendings.tracked(stmt_id)
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Register a connection created by this context and publish it for
    /// adoption by other contexts. This context owns the eventual close.
    pub fn connect(
        &mut self,
        conn: Arc<dyn DriverConnection>,
        pool: Option<Arc<dyn DriverPool>>,
        options: ConnectionOptions,
        failover: FailoverPolicy,
        callback: Option<FailoverCallback>,
    ) -> String {
        let id = self.registry.insert_connection(
            Arc::clone(&conn),
            pool,
            options,
            failover,
            callback,
            Arc::clone(&self.mailbox),
        );
        self.shared.publish(&id, conn);
        tracing::debug!(conn = %id, ctx = self.id, "opened connection");
        id
    }

    /// Set the autocommit flag
    pub fn set_autocommit(&mut self, conn_id: &str, autocommit: bool) -> Result<()> {
        let rec = self
            .registry
            .lookup_connection(conn_id, &self.shared)
            .ok_or_else(|| Error::invalid_handle(HandleKind::Connection, conn_id))?;
        rec.options.autocommit = autocommit;
        Ok(())
    }

    /// Replace the connection's tuning options
    pub fn configure_connection(&mut self, conn_id: &str, options: ConnectionOptions) -> Result<()> {
        let rec = self
            .registry
            .lookup_connection(conn_id, &self.shared)
            .ok_or_else(|| Error::invalid_handle(HandleKind::Connection, conn_id))?;
        rec.options = options;
        Ok(())
    }

    /// Replace the connection's failover policy
    pub fn configure_failover(&mut self, conn_id: &str, policy: FailoverPolicy) -> Result<()> {
        let rec = self
            .registry
            .lookup_connection(conn_id, &self.shared)
            .ok_or_else(|| Error::invalid_handle(HandleKind::Connection, conn_id))?;
        rec.failover = policy;
        Ok(())
    }

    /// Install or remove the failover callback. Callbacks fire only on the
    /// owning context's thread, from [`ExecutionContext::pump_events`].
    pub fn set_failover_callback(
        &mut self,
        conn_id: &str,
        callback: Option<FailoverCallback>,
    ) -> Result<()> {
        let rec = self
            .registry
            .lookup_connection(conn_id, &self.shared)
            .ok_or_else(|| Error::invalid_handle(HandleKind::Connection, conn_id))?;
        rec.callback = callback;
        Ok(())
    }

    /// Commit the connection's current transaction
    pub fn commit(&mut self, conn_id: &str) -> Result<()> {
        let conn = self.conn_driver(conn_id)?;
        match conn.commit() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.report_connection_error(conn_id, "commit", &err);
                Err(err.into())
            }
        }
    }

    /// Roll back the connection's current transaction
    pub fn rollback(&mut self, conn_id: &str) -> Result<()> {
        let conn = self.conn_driver(conn_id)?;
        match conn.rollback() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.report_connection_error(conn_id, "rollback", &err);
                Err(err.into())
            }
        }
    }

    /// Ask the driver to interrupt whatever is executing on the connection
    pub fn break_execution(&mut self, conn_id: &str) -> Result<()> {
        let conn = self.conn_driver(conn_id)?;
        match conn.interrupt() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.report_connection_error(conn_id, "interrupt", &err);
                Err(err.into())
            }
        }
    }

    /// Close a connection.
    ///
    /// Outstanding asynchronous executions on the underlying driver
    /// connection are canceled and joined first. If this context owns the
    /// connection, the shared-map entry is invalidated before the driver
    /// close and erased after it; an adopter only drops its reference.
    pub fn close_connection(&mut self, conn_id: &str) -> Result<()> {
        if self
            .registry
            .lookup_connection(conn_id, &self.shared)
            .is_none()
        {
            return Err(Error::invalid_handle(HandleKind::Connection, conn_id));
        }

        let conn = self.conn_driver(conn_id)?;
        for stmt_handle in self.asyncs.cancel_and_join_all_for_connection(&conn) {
            self.pendings.forget(&stmt_handle);
        }

        let Some(rec) = self.registry.remove_connection(conn_id) else {
            return Err(Error::invalid_handle(HandleKind::Connection, conn_id));
        };

        if rec.owner_close {
            self.shared.mark_owner_gone(conn_id);
            if let Err(err) = rec.conn.close() {
                tracing::warn!(conn = conn_id, error = %err, "driver close failed");
            }
            if let Some(pool) = &rec.pool {
                let _ = pool.close();
            }
            self.shared.erase(conn_id);
            tracing::debug!(conn = conn_id, ctx = self.id, "closed owned connection");
        } else {
            tracing::debug!(conn = conn_id, ctx = self.id, "released adopted connection");
        }
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Open an empty statement on the connection. The connection may have
    /// been created by another context; it is adopted on first use.
    pub fn open_statement(&mut self, conn_id: &str) -> Result<String> {
        if self
            .registry
            .lookup_connection(conn_id, &self.shared)
            .is_none()
        {
            return Err(Error::invalid_handle(HandleKind::Connection, conn_id));
        }
        let id = self
            .registry
            .insert_statement(conn_id)
            .ok_or_else(|| Error::invalid_handle(HandleKind::Connection, conn_id))?;
        tracing::trace!(stmt = %id, conn = conn_id, "opened statement");
        Ok(id)
    }

    /// Parse SQL text into the statement.
    ///
    /// Any outstanding asynchronous execution is canceled and drained
    /// first, the previous bind cycle's pending resources are forgotten,
    /// and the old driver statement (if any) is closed before the new one
    /// is installed.
    pub fn prepare(&mut self, stmt_id: &str, sql: &str) -> Result<()> {
        if self.registry.statement(stmt_id).is_none() {
            return Err(Error::invalid_handle(HandleKind::Statement, stmt_id));
        }

        self.force_wait_and_join(stmt_id, true, None)?;
        self.pendings.forget(stmt_id);

        let conn_id = {
            let rec = self
                .registry
                .statement_mut(stmt_id)
                .ok_or_else(|| Error::invalid_handle(HandleKind::Statement, stmt_id))?;
            if let Some(old) = rec.stmt.take() {
                let _ = old.close();
            }
            rec.conn_id.clone()
        };

        let conn = self.conn_driver(&conn_id)?;
        match conn.prepare(sql) {
            Ok(stmt) => {
                let class = stmt.info().map(|i| i.class()).unwrap_or_default();
                if let Some(rec) = self.registry.statement_mut(stmt_id) {
                    rec.status.clear();
                    rec.status.class = class;
                    rec.defined = false;
                    rec.stmt = Some(stmt);
                }
                tracing::trace!(stmt = stmt_id, "prepared statement");
                Ok(())
            }
            Err(err) => {
                self.report_statement_error(stmt_id, "prepare", &err);
                if let Some(rec) = self.registry.connection_mut(&conn_id) {
                    rec.status.set_driver_error("prepare", &err);
                }
                Err(err.into())
            }
        }
    }

    /// Execute the statement synchronously on the calling thread.
    ///
    /// Autocommit and the explicit `commit` flag resolve into the driver's
    /// commit-on-success mode exactly as the asynchronous path does. On
    /// success the affected-row count lands on the statement's status
    /// block. The bind cycle's pending resources are released either way.
    pub fn execute(&mut self, stmt_id: &str, commit: bool) -> Result<i32> {
        self.exec_sync(stmt_id, commit, None)
    }

    /// Execute the statement once per bound iteration (array DML) on the
    /// calling thread. Commit-mode resolution matches
    /// [`ExecutionContext::execute`].
    pub fn execute_batch(&mut self, stmt_id: &str, iterations: u32, commit: bool) -> Result<i32> {
        self.exec_sync(stmt_id, commit, Some(iterations))
    }

    fn exec_sync(&mut self, stmt_id: &str, commit: bool, iterations: Option<u32>) -> Result<i32> {
        let function = if iterations.is_some() {
            "executeBatch"
        } else {
            "execute"
        };
        let (stmt, conn_id) = {
            let rec = self
                .registry
                .statement(stmt_id)
                .ok_or_else(|| Error::invalid_handle(HandleKind::Statement, stmt_id))?;
            (rec.stmt.clone(), rec.conn_id.clone())
        };
        let Some(stmt) = stmt else {
            if let Some(rec) = self.registry.statement_mut(stmt_id) {
                rec.status.set_error(
                    function,
                    result_code::GENERIC_FAILURE,
                    "statement is not prepared",
                );
            }
            return Err(Error::StatementNotPrepared);
        };

        let autocommit = self
            .registry
            .connection(&conn_id)
            .map(|c| c.options.autocommit)
            .unwrap_or(false);
        let info = stmt.info().ok();
        let mode = resolve_exec_mode(commit, autocommit, info.as_ref());

        let outcome = match iterations {
            Some(n) => stmt.execute_batch(mode, n),
            None => stmt.execute(mode),
        };
        self.pendings.release_all(stmt_id);

        match outcome {
            Ok(rows) => {
                if let Some(rec) = self.registry.statement_mut(stmt_id) {
                    rec.status.record_rows(rows);
                    if let Some(info) = info {
                        rec.status.class = info.class();
                    }
                }
                Ok(result_code::SUCCESS)
            }
            Err(err) => {
                self.report_statement_error(stmt_id, function, &err);
                Err(err.into())
            }
        }
    }

    /// Close a statement. Drains (canceling) any outstanding asynchronous
    /// execution, forgets pending resources, and releases the driver
    /// statement.
    pub fn close_statement(&mut self, stmt_id: &str) -> Result<()> {
        if self.registry.statement(stmt_id).is_none() {
            return Err(Error::invalid_handle(HandleKind::Statement, stmt_id));
        }
        self.force_wait_and_join(stmt_id, true, None)?;
        self.pendings.forget(stmt_id);

        if let Some(rec) = self.registry.remove_statement(stmt_id) {
            if let Some(stmt) = rec.stmt {
                let _ = stmt.close();
            }
        }
        tracing::trace!(stmt = stmt_id, "closed statement");
        Ok(())
    }

    // =========================================================================
    // Asynchronous Execution
    // =========================================================================

    /// Begin executing the statement on a dedicated worker thread.
    ///
    /// Returns immediately. Fails with [`Error::AlreadyExecuting`] while a
    /// previous execution on the same statement is still running.
    pub fn start_async(&mut self, stmt_id: &str, commit: bool) -> Result<()> {
        let (token, conn, stmt, conn_id) = {
            let rec = self
                .registry
                .statement(stmt_id)
                .ok_or_else(|| Error::invalid_handle(HandleKind::Statement, stmt_id))?;
            (
                rec.token(),
                Arc::clone(&rec.conn),
                rec.stmt.clone(),
                rec.conn_id.clone(),
            )
        };
        let Some(stmt) = stmt else {
            if let Some(rec) = self.registry.statement_mut(stmt_id) {
                rec.status.set_error(
                    "startAsync",
                    result_code::GENERIC_FAILURE,
                    "statement is not prepared",
                );
            }
            return Err(Error::StatementNotPrepared);
        };
        let autocommit = self
            .registry
            .connection(&conn_id)
            .map(|c| c.options.autocommit)
            .unwrap_or(false);

        match self
            .asyncs
            .start(token, stmt_id, &conn, &stmt, commit, autocommit)
        {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(rec) = self.registry.statement_mut(stmt_id) {
                    rec.status.set_error(
                        "startAsync",
                        result_code::GENERIC_FAILURE,
                        err.to_string(),
                    );
                }
                Err(err)
            }
        }
    }

    /// Wait for the statement's asynchronous execution.
    ///
    /// With no execution outstanding the call is a no-op success. When the
    /// timeout expires first, the distinguished still-processing code is
    /// returned and the worker keeps running. On completion the captured
    /// result is surfaced through the statement's status block and the
    /// bind cycle's pending tracking is forgotten.
    pub fn wait_async(&mut self, stmt_id: &str, timeout: Option<Duration>) -> Result<i32> {
        let token = self
            .registry
            .statement(stmt_id)
            .ok_or_else(|| Error::invalid_handle(HandleKind::Statement, stmt_id))?
            .token();

        match self.asyncs.wait(token, timeout) {
            WaitStatus::Idle => Ok(result_code::SUCCESS),
            WaitStatus::StillProcessing => {
                if let Some(rec) = self.registry.statement_mut(stmt_id) {
                    rec.status.set_error(
                        "waitAsync",
                        result_code::STILL_PROCESSING,
                        "asynchronous command still processing",
                    );
                }
                Ok(result_code::STILL_PROCESSING)
            }
            WaitStatus::Complete(c) => {
                self.pendings.forget(stmt_id);
                self.refresh_statement_class(stmt_id);
                if c.rc == result_code::SUCCESS {
                    if let Some(rec) = self.registry.statement_mut(stmt_id) {
                        rec.status.record_rows(c.rows);
                    }
                } else if let Some(err) = &c.error {
                    self.report_statement_error(stmt_id, "executeAsync", err);
                } else if let Some(rec) = self.registry.statement_mut(stmt_id) {
                    rec.status.set_error(
                        "executeAsync",
                        result_code::GENERIC_FAILURE,
                        "asynchronous execute failed",
                    );
                }
                Ok(c.rc)
            }
        }
    }

    /// Drain the statement's asynchronous execution, optionally canceling
    /// it first. Used by close/re-prepare and connection teardown; the
    /// captured result is discarded rather than surfaced.
    pub fn force_wait_and_join(
        &mut self,
        stmt_id: &str,
        cancel: bool,
        timeout: Option<Duration>,
    ) -> Result<i32> {
        let token = self
            .registry
            .statement(stmt_id)
            .ok_or_else(|| Error::invalid_handle(HandleKind::Statement, stmt_id))?
            .token();

        let status = if cancel {
            self.asyncs.cancel_and_wait_one(token, timeout)
        } else {
            self.asyncs.wait(token, timeout)
        };

        match status {
            WaitStatus::StillProcessing => Ok(result_code::STILL_PROCESSING),
            WaitStatus::Idle => Ok(result_code::SUCCESS),
            WaitStatus::Complete(_) => {
                self.pendings.forget(stmt_id);
                self.refresh_statement_class(stmt_id);
                Ok(result_code::SUCCESS)
            }
        }
    }

    /// Cancel and join every outstanding asynchronous execution on the
    /// connection, forgetting the drained statements' pending resources
    pub fn cancel_and_join_all_for_connection(&mut self, conn_id: &str) -> Result<()> {
        let conn = self.conn_driver(conn_id)?;
        for stmt_handle in self.asyncs.cancel_and_join_all_for_connection(&conn) {
            self.pendings.forget(&stmt_handle);
        }
        Ok(())
    }

    // =========================================================================
    // Binds / Pending Resources
    // =========================================================================

    /// Track a driver resource created during the statement's bind cycle
    pub fn track_pending(
        &mut self,
        stmt_id: &str,
        resource: Arc<dyn PendingResource>,
    ) -> Result<()> {
        if self.registry.statement(stmt_id).is_none() {
            return Err(Error::invalid_handle(HandleKind::Statement, stmt_id));
        }
        self.pendings.track(stmt_id, resource);
        Ok(())
    }

    /// Release the statement's tracked resources before a new bind batch
    pub fn release_pending(&mut self, stmt_id: &str) {
        self.pendings.release_all(stmt_id);
    }

    /// Release and drop the statement's tracking entry entirely
    pub fn forget_pending(&mut self, stmt_id: &str) {
        self.pendings.forget(stmt_id);
    }

    // =========================================================================
    // Large Objects
    // =========================================================================

    /// Register a large-object locator produced by a fetch
    pub fn open_lob(&mut self, lob: Arc<dyn DriverLob>) -> String {
        self.registry.insert_lob(lob)
    }

    /// Close a large object
    pub fn close_lob(&mut self, lob_id: &str) -> Result<()> {
        let rec = self
            .registry
            .remove_lob(lob_id)
            .ok_or_else(|| Error::invalid_handle(HandleKind::LargeObject, lob_id))?;
        let _ = rec.lob.close();
        Ok(())
    }

    // =========================================================================
    // Failover Event Processing
    // =========================================================================

    /// Drain the context's mailbox and fire due debounce timers.
    ///
    /// Called from the owning context's run loop; this is the only place
    /// failover callbacks are invoked. Each drained event re-resolves its
    /// connection by handle identifier, replaces any previously pending
    /// message, and arms the debounce timer if it is not already armed.
    pub fn pump_events(&mut self) {
        for event in self.mailbox.drain() {
            match self.registry.lookup_connection(&event.conn_id, &self.shared) {
                Some(rec) => {
                    rec.fo_pending = Some(event.message);
                    if rec.fo_deadline.is_none() {
                        rec.fo_deadline = Some(Instant::now() + rec.failover.debounce);
                    }
                }
                None => {
                    tracing::trace!(conn = %event.conn_id, "dropped failover event for unknown connection");
                }
            }
        }
        self.fire_due_timers();
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        let mut due = Vec::new();
        for rec in self.registry.connections_mut() {
            if rec.fo_deadline.is_some_and(|deadline| deadline <= now) {
                rec.fo_deadline = None;
                let pending = rec.fo_pending.take();
                due.push((rec.id.clone(), rec.callback.clone(), pending));
            }
        }
        for (conn_id, callback, pending) in due {
            if let (Some(callback), Some(message)) = (callback, pending) {
                tracing::debug!(conn = %conn_id, "invoking failover callback");
                callback(&conn_id, RECOVERABLE_TAG, &message);
            }
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Tear down the context: close the mailbox, then every large object,
    /// statement, and connection, in that order. Statements drain their
    /// asynchronous executions before their connections are released.
    pub fn teardown(&mut self) {
        self.mailbox.close();
        for id in self.registry.lob_ids() {
            let _ = self.close_lob(&id);
        }
        for id in self.registry.statement_ids() {
            let _ = self.close_statement(&id);
        }
        for id in self.registry.connection_ids() {
            let _ = self.close_connection(&id);
        }
        tracing::debug!(ctx = self.id, "context torn down");
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    fn conn_driver(&mut self, conn_id: &str) -> Result<Arc<dyn DriverConnection>> {
        self.registry
            .lookup_connection(conn_id, &self.shared)
            .map(|rec| Arc::clone(&rec.conn))
            .ok_or_else(|| Error::invalid_handle(HandleKind::Connection, conn_id))
    }

    fn refresh_statement_class(&mut self, stmt_id: &str) {
        let info = self
            .registry
            .statement(stmt_id)
            .and_then(|rec| rec.stmt.as_ref())
            .and_then(|stmt| stmt.info().ok());
        if let (Some(info), Some(rec)) = (info, self.registry.statement_mut(stmt_id)) {
            rec.status.class = info.class();
        }
    }

    fn report_connection_error(&mut self, conn_id: &str, function: &str, err: &DriverError) {
        if let Some(rec) = self.registry.connection_mut(conn_id) {
            rec.status.set_driver_error(function, err);
        }
        if err.recoverable {
            self.post_failover(conn_id, &err.message);
        }
    }

    fn report_statement_error(&mut self, stmt_id: &str, function: &str, err: &DriverError) {
        let conn_id = match self.registry.statement_mut(stmt_id) {
            Some(rec) => {
                rec.status.set_driver_error(function, err);
                rec.conn_id.clone()
            }
            None => return,
        };
        if err.recoverable {
            self.post_failover(&conn_id, &err.message);
        }
    }

    // Route a recoverable error to the connection's owning context. Only
    // records that carry a callback (owner-created) produce events; the
    // pin on the mailbox Arc keeps delivery safe even mid-teardown.
    fn post_failover(&mut self, conn_id: &str, message: &str) {
        if let Some(rec) = self.registry.connection(conn_id) {
            if rec.callback.is_some() {
                if let Some(mailbox) = &rec.owner_mailbox {
                    mailbox.post(FailoverEvent {
                        conn_id: conn_id.to_string(),
                        message: message.to_string(),
                    });
                }
            }
        }
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.teardown();
    }
}
