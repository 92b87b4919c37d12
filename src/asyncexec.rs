//! Asynchronous statement execution
//!
//! One dedicated worker thread per in-flight execution, created on demand
//! and joined on completion; no thread pool. The process-wide
//! [`AsyncTable`] keys execution records by statement identity
//! ([`StmtToken`]), never by handle string, so statements from different
//! contexts cannot collide.
//!
//! Per-statement state machine:
//!
//! ```text
//! idle -> running -> done(success | failure) -> joined -> idle
//! ```
//!
//! Cancellation is cooperative: it asks the driver to interrupt the call
//! executing on the connection and marks the record canceled; the worker
//! still runs to `done`. A timed wait that expires does not cancel — it
//! reports a "still processing" status and leaves the worker for a later
//! wait to reap. Exactly one waiter performs the join; concurrent waiters
//! poll until the joiner has removed the record from the table.
//!
//! Errors raised by the driver inside the worker are captured into the
//! record under its lock and surface only when a wait consumes them; they
//! never unwind across the thread boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::constants::{result_code, REAP_POLL_MS};
use crate::driver::{resolve_exec_mode, DriverConnection, DriverError, DriverStatement};
use crate::error::{Error, Result};
use crate::registry::StmtToken;

/// Terminal outcome of an asynchronous execution
#[derive(Debug, Clone)]
pub struct Completion {
    /// Result code: 0 on success, negative on failure
    pub rc: i32,
    /// Affected-row count reported by the driver on success
    pub rows: u64,
    /// Captured driver error, present when `rc != 0` and the driver
    /// supplied one
    pub error: Option<DriverError>,
    /// Whether cancellation was requested before completion
    pub canceled: bool,
}

/// Outcome of a wait on a statement's execution
#[derive(Debug, Clone)]
pub enum WaitStatus {
    /// No execution outstanding; treated as already complete
    Idle,
    /// The timeout expired while the worker is still running; nothing was
    /// joined and a later wait must reap the worker
    StillProcessing,
    /// The execution finished; the record has been joined and removed
    Complete(Completion),
}

impl WaitStatus {
    /// Collapse into the result code the command layer reports
    pub fn rc(&self) -> i32 {
        match self {
            WaitStatus::Idle => result_code::SUCCESS,
            WaitStatus::StillProcessing => result_code::STILL_PROCESSING,
            WaitStatus::Complete(c) => c.rc,
        }
    }
}

#[derive(Default)]
struct AsyncState {
    running: bool,
    done: bool,
    canceled: bool,
    joined: bool,
    rc: i32,
    rows: u64,
    error: Option<DriverError>,
    worker: Option<JoinHandle<()>>,
}

struct AsyncRecord {
    token: StmtToken,
    // External handle string, kept for cleanup callbacks that only see the
    // handle name (pending-resource forget).
    handle_id: String,
    conn: Arc<dyn DriverConnection>,
    stmt: Arc<dyn DriverStatement>,
    state: Mutex<AsyncState>,
    done_cv: Condvar,
}

/// Process-wide table of in-flight and finished-but-unjoined executions
#[derive(Default)]
pub struct AsyncTable {
    inner: Mutex<HashMap<StmtToken, Arc<AsyncRecord>>>,
}

impl AsyncTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, token: StmtToken) -> Option<Arc<AsyncRecord>> {
        self.inner.lock().get(&token).map(Arc::clone)
    }

    fn remove(&self, token: StmtToken) {
        self.inner.lock().remove(&token);
    }

    /// Begin an asynchronous execution for the statement.
    ///
    /// Rejects with [`Error::AlreadyExecuting`] while a previous execution
    /// is still running. A finished-but-unjoined predecessor is reaped
    /// (its worker joined, its captured references dropped) before the new
    /// record is installed. Returns as soon as the worker is spawned; the
    /// result is observed through [`AsyncTable::wait`].
    pub fn start(
        &self,
        token: StmtToken,
        handle_id: &str,
        conn: &Arc<dyn DriverConnection>,
        stmt: &Arc<dyn DriverStatement>,
        commit_requested: bool,
        autocommit: bool,
    ) -> Result<()> {
        let mut table = self.inner.lock();

        if let Some(prev) = table.get(&token) {
            let mut st = prev.state.lock();
            if st.running && !st.done {
                return Err(Error::AlreadyExecuting);
            }
            // The slot may only be reused once the old worker has reached
            // its terminal state.
            assert!(st.done, "async slot reused before the worker finished");
            let worker = st.worker.take();
            let joined = st.joined;
            drop(st);
            table.remove(&token);
            if let (Some(handle), false) = (worker, joined) {
                // Worker already hit done, so this cannot block.
                let _ = handle.join();
            }
            tracing::trace!(stmt = handle_id, "reaped finished async record before restart");
        }

        let record = Arc::new(AsyncRecord {
            token,
            handle_id: handle_id.to_string(),
            conn: Arc::clone(conn),
            stmt: Arc::clone(stmt),
            state: Mutex::new(AsyncState {
                running: true,
                ..Default::default()
            }),
            done_cv: Condvar::new(),
        });

        let worker_rec = Arc::clone(&record);
        let spawned = thread::Builder::new()
            .name(format!("orabridge-exec-{handle_id}"))
            .spawn(move || worker_body(worker_rec, commit_requested, autocommit));

        match spawned {
            Ok(handle) => {
                record.state.lock().worker = Some(handle);
                table.insert(token, record);
                tracing::debug!(stmt = handle_id, "started async execution");
                Ok(())
            }
            Err(e) => {
                // Nothing was inserted; dropping the record releases the
                // connection and statement references taken above.
                tracing::warn!(stmt = handle_id, error = %e, "async worker spawn failed");
                Err(Error::WorkerSpawn(e))
            }
        }
    }

    /// Wait for the statement's execution to finish.
    ///
    /// `timeout` of `None` waits indefinitely. On completion exactly one
    /// caller joins the worker and removes the record; concurrent callers
    /// poll until the record disappears, then report the same terminal
    /// result.
    pub fn wait(&self, token: StmtToken, timeout: Option<Duration>) -> WaitStatus {
        let Some(rec) = self.lookup(token) else {
            return WaitStatus::Idle;
        };

        let deadline = timeout.map(|t| Instant::now() + t);
        let (completion, join_here, worker) = {
            let mut st = rec.state.lock();
            while st.running && !st.done {
                match deadline {
                    Some(d) => {
                        if Instant::now() >= d {
                            return WaitStatus::StillProcessing;
                        }
                        rec.done_cv.wait_until(&mut st, d);
                    }
                    None => rec.done_cv.wait(&mut st),
                }
            }
            let completion = Completion {
                rc: st.rc,
                rows: st.rows,
                error: st.error.clone(),
                canceled: st.canceled,
            };
            let join_here = !st.joined;
            let worker = if join_here {
                st.joined = true;
                st.worker.take()
            } else {
                None
            };
            (completion, join_here, worker)
        };

        if join_here {
            if let Some(handle) = worker {
                let _ = handle.join();
            }
            self.remove(token);
            tracing::debug!(stmt = %rec.handle_id, rc = completion.rc, "joined async execution");
        } else {
            // Another waiter owns the join; hold off until it has removed
            // the record so the caller can immediately reuse the statement.
            while self.lookup(token).is_some() {
                thread::sleep(Duration::from_millis(REAP_POLL_MS));
            }
        }

        WaitStatus::Complete(completion)
    }

    /// Request cancellation of the statement's execution, then wait.
    ///
    /// The driver is asked to interrupt the call running on the captured
    /// connection; the worker still runs to `done` and is reaped by the
    /// wait path.
    pub fn cancel_and_wait_one(&self, token: StmtToken, timeout: Option<Duration>) -> WaitStatus {
        if let Some(rec) = self.lookup(token) {
            let _ = rec.conn.interrupt();
            rec.state.lock().canceled = true;
            tracing::debug!(stmt = %rec.handle_id, "requested async cancellation");
        }
        self.wait(token, timeout)
    }

    /// Cancel and join every outstanding execution on the given driver
    /// connection. Returns the statement handle identifiers that were
    /// drained so the caller can forget their pending-resource tracking.
    ///
    /// The snapshot is taken under the table lock and the lock released
    /// before any cancel/join, which must re-acquire it for record removal.
    pub fn cancel_and_join_all_for_connection(
        &self,
        conn: &Arc<dyn DriverConnection>,
    ) -> Vec<String> {
        let snapshot: Vec<(StmtToken, String)> = {
            let table = self.inner.lock();
            table
                .values()
                .filter(|rec| Arc::ptr_eq(&rec.conn, conn))
                .map(|rec| (rec.token, rec.handle_id.clone()))
                .collect()
        };

        let mut drained = Vec::with_capacity(snapshot.len());
        for (token, handle_id) in snapshot {
            let _ = self.cancel_and_wait_one(token, None);
            drained.push(handle_id);
        }
        drained
    }

    /// Number of outstanding records for the given driver connection
    pub fn outstanding_for(&self, conn: &Arc<dyn DriverConnection>) -> usize {
        let table = self.inner.lock();
        table
            .values()
            .filter(|rec| Arc::ptr_eq(&rec.conn, conn))
            .count()
    }

    /// Whether an execution record exists for the statement
    pub fn contains(&self, token: StmtToken) -> bool {
        self.inner.lock().contains_key(&token)
    }

    /// Total number of records in the table
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    #[cfg(test)]
    fn done_unjoined(&self, token: StmtToken) -> bool {
        self.lookup(token).is_some_and(|rec| {
            let st = rec.state.lock();
            st.done && !st.joined
        })
    }
}

fn worker_body(rec: Arc<AsyncRecord>, commit_requested: bool, autocommit: bool) {
    let info = rec.stmt.info().ok();
    let mode = resolve_exec_mode(commit_requested, autocommit, info.as_ref());

    let result = rec.stmt.execute(mode);

    let mut st = rec.state.lock();
    match result {
        Ok(rows) => {
            st.rc = result_code::SUCCESS;
            st.rows = rows;
        }
        Err(err) => {
            tracing::trace!(stmt = %rec.handle_id, code = err.code, "async execute failed");
            st.rc = result_code::GENERIC_FAILURE;
            st.error = Some(err);
        }
    }
    st.done = true;
    st.running = false;
    rec.done_cv.notify_all();
}
