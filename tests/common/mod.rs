//! In-memory fake driver used by the integration tests.
//!
//! Statements are staged on the connection ahead of `prepare` so each test
//! controls exactly what the engine sees: instant results, injected driver
//! errors, or an execute that blocks until released or interrupted.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use orabridge::{
    AsyncTable, DriverConnection, DriverError, DriverLob, DriverPool, DriverResult,
    DriverStatement, ExecutionContext, PendingResource, SharedConnectionMap, StatementInfo,
};

/// Shared record of driver close calls, in order
pub type CloseLog = Arc<Mutex<Vec<String>>>;

pub fn close_log() -> CloseLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Fresh context plus the process-wide maps it shares
pub fn new_engine() -> (ExecutionContext, Arc<SharedConnectionMap>, Arc<AsyncTable>) {
    let shared = Arc::new(SharedConnectionMap::new());
    let asyncs = Arc::new(AsyncTable::new());
    let ctx = ExecutionContext::new(Arc::clone(&shared), Arc::clone(&asyncs));
    (ctx, shared, asyncs)
}

/// Additional context on the same process-wide maps
pub fn sibling_context(
    shared: &Arc<SharedConnectionMap>,
    asyncs: &Arc<AsyncTable>,
) -> ExecutionContext {
    ExecutionContext::new(Arc::clone(shared), Arc::clone(asyncs))
}

pub struct FakeConn {
    pub name: String,
    pub interrupted: Arc<AtomicBool>,
    pub closed: AtomicBool,
    pub commits: AtomicU32,
    pub rollbacks: AtomicU32,
    staged: Mutex<VecDeque<Arc<FakeStmt>>>,
    fail_next_prepare: Mutex<Option<DriverError>>,
    log: Option<CloseLog>,
}

impl FakeConn {
    pub fn new() -> Arc<Self> {
        Self::build("conn", None)
    }

    pub fn logged(name: &str, log: &CloseLog) -> Arc<Self> {
        Self::build(name, Some(Arc::clone(log)))
    }

    fn build(name: &str, log: Option<CloseLog>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            interrupted: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
            commits: AtomicU32::new(0),
            rollbacks: AtomicU32::new(0),
            staged: Mutex::new(VecDeque::new()),
            fail_next_prepare: Mutex::new(None),
            log,
        })
    }

    /// Queue the statement the next `prepare` call will return
    pub fn stage(&self, stmt: &Arc<FakeStmt>) {
        self.staged.lock().push_back(Arc::clone(stmt));
    }

    /// Make the next `prepare` call fail with the given error
    pub fn fail_next_prepare(&self, err: DriverError) {
        *self.fail_next_prepare.lock() = Some(err);
    }

    pub fn as_driver(self: &Arc<Self>) -> Arc<dyn DriverConnection> {
        Arc::clone(self) as Arc<dyn DriverConnection>
    }
}

impl DriverConnection for FakeConn {
    fn prepare(&self, _sql: &str) -> DriverResult<Arc<dyn DriverStatement>> {
        if let Some(err) = self.fail_next_prepare.lock().take() {
            return Err(err);
        }
        if let Some(stmt) = self.staged.lock().pop_front() {
            return Ok(stmt as Arc<dyn DriverStatement>);
        }
        Ok(FakeStmt::query_flag(&self.interrupted, 0) as Arc<dyn DriverStatement>)
    }

    fn commit(&self) -> DriverResult<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> DriverResult<()> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn interrupt(&self) -> DriverResult<()> {
        self.interrupted.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn ping(&self) -> DriverResult<()> {
        Ok(())
    }

    fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push(format!("close:{}", self.name));
        }
        Ok(())
    }
}

enum Behavior {
    Succeed { rows: u64, delay: Duration },
    Fail(DriverError),
    Block,
}

pub struct FakeStmt {
    name: String,
    info: StatementInfo,
    behavior: Behavior,
    interrupted: Arc<AtomicBool>,
    hold: AtomicBool,
    pub executions: AtomicU32,
    pub last_mode: AtomicU32,
    pub closed: AtomicBool,
    log: Option<CloseLog>,
}

impl FakeStmt {
    fn build(
        interrupted: &Arc<AtomicBool>,
        info: StatementInfo,
        behavior: Behavior,
        hold: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: "stmt".to_string(),
            info,
            behavior,
            interrupted: Arc::clone(interrupted),
            hold: AtomicBool::new(hold),
            executions: AtomicU32::new(0),
            last_mode: AtomicU32::new(0),
            closed: AtomicBool::new(false),
            log: None,
        })
    }

    fn query_info() -> StatementInfo {
        StatementInfo {
            is_query: true,
            ..Default::default()
        }
    }

    fn dml_info() -> StatementInfo {
        StatementInfo {
            is_dml: true,
            ..Default::default()
        }
    }

    fn query_flag(interrupted: &Arc<AtomicBool>, rows: u64) -> Arc<Self> {
        Self::build(
            interrupted,
            Self::query_info(),
            Behavior::Succeed {
                rows,
                delay: Duration::ZERO,
            },
            false,
        )
    }

    /// SELECT that completes immediately
    pub fn query(conn: &Arc<FakeConn>) -> Arc<Self> {
        Self::query_flag(&conn.interrupted, 0)
    }

    /// SELECT that takes `delay` to complete
    pub fn slow_query(conn: &Arc<FakeConn>, delay: Duration) -> Arc<Self> {
        Self::build(
            &conn.interrupted,
            Self::query_info(),
            Behavior::Succeed {
                rows: 0,
                delay,
            },
            false,
        )
    }

    /// DML reporting `rows` affected
    pub fn dml(conn: &Arc<FakeConn>, rows: u64) -> Arc<Self> {
        Self::build(
            &conn.interrupted,
            Self::dml_info(),
            Behavior::Succeed {
                rows,
                delay: Duration::ZERO,
            },
            false,
        )
    }

    /// Execute blocks until [`FakeStmt::release`] or a connection interrupt
    pub fn blocking(conn: &Arc<FakeConn>) -> Arc<Self> {
        Self::build(&conn.interrupted, Self::query_info(), Behavior::Block, true)
    }

    /// Execute fails with the given driver error
    pub fn failing(conn: &Arc<FakeConn>, err: DriverError) -> Arc<Self> {
        Self::build(&conn.interrupted, Self::dml_info(), Behavior::Fail(err), false)
    }

    /// Attach a close log under the given label
    pub fn with_log(self: Arc<Self>, name: &str, log: &CloseLog) -> Arc<Self> {
        let mut stmt = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("log attached too late"));
        stmt.name = name.to_string();
        stmt.log = Some(Arc::clone(log));
        Arc::new(stmt)
    }

    /// Let a blocking execute finish normally
    pub fn release(&self) {
        self.hold.store(false, Ordering::SeqCst);
    }
}

impl DriverStatement for FakeStmt {
    fn execute(&self, mode: u32) -> DriverResult<u64> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        self.last_mode.store(mode, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Block => {
                while self.hold.load(Ordering::SeqCst) {
                    if self.interrupted.load(Ordering::SeqCst) {
                        return Err(DriverError::new(1013, "user requested cancel of current operation"));
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                Ok(0)
            }
            Behavior::Fail(err) => Err(err.clone()),
            Behavior::Succeed { rows, delay } => {
                if !delay.is_zero() {
                    thread::sleep(*delay);
                }
                Ok(*rows)
            }
        }
    }

    fn execute_batch(&self, mode: u32, _iterations: u32) -> DriverResult<u64> {
        self.execute(mode)
    }

    fn info(&self) -> DriverResult<StatementInfo> {
        Ok(self.info)
    }

    fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push(format!("close:{}", self.name));
        }
        Ok(())
    }
}

pub struct FakeLob {
    name: String,
    pub closed: AtomicBool,
    log: Option<CloseLog>,
}

impl FakeLob {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            name: "lob".to_string(),
            closed: AtomicBool::new(false),
            log: None,
        })
    }

    pub fn logged(name: &str, log: &CloseLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            closed: AtomicBool::new(false),
            log: Some(Arc::clone(log)),
        })
    }

    pub fn as_driver(self: &Arc<Self>) -> Arc<dyn DriverLob> {
        Arc::clone(self) as Arc<dyn DriverLob>
    }
}

impl DriverLob for FakeLob {
    fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().push(format!("close:{}", self.name));
        }
        Ok(())
    }
}

pub struct FakePool {
    pub closed: AtomicBool,
}

impl FakePool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
        })
    }

    pub fn as_driver(self: &Arc<Self>) -> Arc<dyn DriverPool> {
        Arc::clone(self) as Arc<dyn DriverPool>
    }
}

impl DriverPool for FakePool {
    fn acquire(&self) -> DriverResult<Arc<dyn DriverConnection>> {
        Ok(FakeConn::new().as_driver())
    }

    fn close(&self) -> DriverResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Bound variable stand-in whose drop decrements a shared live counter
pub struct FakeVar {
    live: Arc<AtomicUsize>,
}

impl FakeVar {
    pub fn new(live: &Arc<AtomicUsize>) -> Arc<dyn PendingResource> {
        live.fetch_add(1, Ordering::SeqCst);
        Arc::new(Self {
            live: Arc::clone(live),
        })
    }
}

impl PendingResource for FakeVar {}

impl Drop for FakeVar {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Install a test subscriber once; respects RUST_LOG
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
