//! Integration tests for the asynchronous execution engine driven through
//! execution contexts: start/wait/cancel semantics, worker lifecycle, and
//! pending-resource interaction across execute cycles.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{new_engine, FakeConn, FakeStmt, FakeVar};
use orabridge::constants::{exec_mode, result_code};
use orabridge::{ConnectionOptions, Error, FailoverPolicy, StatementClass};

fn open_prepared(
    ctx: &mut orabridge::ExecutionContext,
    conn: &Arc<FakeConn>,
    stmt: &Arc<FakeStmt>,
    options: ConnectionOptions,
) -> (String, String) {
    let conn_id = ctx.connect(conn.as_driver(), None, options, FailoverPolicy::new(), None);
    let stmt_id = ctx.open_statement(&conn_id).expect("open statement");
    conn.stage(stmt);
    ctx.prepare(&stmt_id, "SELECT 1 FROM dual").expect("prepare");
    (conn_id, stmt_id)
}

mod start_wait_tests {
    use super::*;

    #[test]
    fn test_select_start_wait_within_timeout() {
        common::init_tracing();
        let (mut ctx, _, asyncs) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::slow_query(&conn, Duration::from_millis(30));
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");
        let rc = ctx
            .wait_async(&stmt_id, Some(Duration::from_millis(5000)))
            .expect("wait");

        assert_eq!(rc, result_code::SUCCESS);
        assert_eq!(stmt.executions.load(Ordering::SeqCst), 1);
        assert!(asyncs.is_empty(), "record must be reaped after the wait");

        let status = ctx.status(&stmt_id).expect("status");
        assert_eq!(status.rc, 0);
        assert_eq!(status.class, StatementClass::Query);
    }

    #[test]
    fn test_second_start_rejected_first_unaffected() {
        let (mut ctx, _, _) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::blocking(&conn);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("first start");
        let second = ctx.start_async(&stmt_id, false);
        assert!(matches!(second, Err(Error::AlreadyExecuting)));

        // the rejection lands on the status block too
        let status = ctx.status(&stmt_id).expect("status");
        assert_eq!(
            status.error.as_deref(),
            Some("statement already executing asynchronously")
        );

        stmt.release();
        let rc = ctx.wait_async(&stmt_id, None).expect("wait");
        assert_eq!(rc, result_code::SUCCESS);
        assert_eq!(stmt.executions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_update_with_autocommit_records_rows() {
        let (mut ctx, _, _) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::dml(&conn, 3);
        let (_, stmt_id) = open_prepared(
            &mut ctx,
            &conn,
            &stmt,
            ConnectionOptions::new().with_autocommit(true),
        );

        ctx.start_async(&stmt_id, false).expect("start");
        let rc = ctx.wait_async(&stmt_id, None).expect("wait");

        assert_eq!(rc, result_code::SUCCESS);
        let status = ctx.status(&stmt_id).expect("status");
        assert_eq!(status.rows, 3);
        assert_eq!(status.class, StatementClass::Dml);

        // autocommit on a DML statement rides the execute
        let mode = stmt.last_mode.load(Ordering::SeqCst);
        assert_ne!(mode & exec_mode::COMMIT_ON_SUCCESS, 0);
    }

    #[test]
    fn test_explicit_commit_flag_on_query() {
        let (mut ctx, _, _) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::query(&conn);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, true).expect("start");
        ctx.wait_async(&stmt_id, None).expect("wait");

        let mode = stmt.last_mode.load(Ordering::SeqCst);
        assert_ne!(mode & exec_mode::COMMIT_ON_SUCCESS, 0);
    }

    #[test]
    fn test_wait_without_outstanding_execution_is_success() {
        let (mut ctx, _, _) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::query(&conn);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        let rc = ctx.wait_async(&stmt_id, None).expect("wait");
        assert_eq!(rc, result_code::SUCCESS);
    }

    #[test]
    fn test_wait_on_unknown_statement_is_invalid_handle() {
        let (mut ctx, _, _) = new_engine();
        let err = ctx.wait_async("stmt999999", None).unwrap_err();
        assert!(err.is_invalid_handle());
    }
}

mod timeout_tests {
    use super::*;

    #[test]
    fn test_timed_out_wait_leaves_worker_running() {
        let (mut ctx, _, asyncs) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::blocking(&conn);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");

        let rc = ctx
            .wait_async(&stmt_id, Some(Duration::ZERO))
            .expect("timed wait");
        assert_eq!(rc, result_code::STILL_PROCESSING);

        // still-processing is visible on the status block afterwards
        let status = ctx.status(&stmt_id).expect("status");
        assert_eq!(status.rc, result_code::STILL_PROCESSING);

        // nothing was joined; the record is still in the table
        assert_eq!(asyncs.len(), 1);

        stmt.release();
        let rc = ctx.wait_async(&stmt_id, None).expect("final wait");
        assert_eq!(rc, result_code::SUCCESS);
        assert!(asyncs.is_empty());
    }

    #[test]
    fn test_repeated_timed_waits_then_completion() {
        let (mut ctx, _, _) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::blocking(&conn);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");
        for _ in 0..3 {
            let rc = ctx
                .wait_async(&stmt_id, Some(Duration::from_millis(5)))
                .expect("poll");
            assert_eq!(rc, result_code::STILL_PROCESSING);
        }

        stmt.release();
        assert_eq!(
            ctx.wait_async(&stmt_id, None).expect("wait"),
            result_code::SUCCESS
        );
    }
}

mod cancel_tests {
    use super::*;

    #[test]
    fn test_break_then_wait_surfaces_cancel_error() {
        let (mut ctx, _, asyncs) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::blocking(&conn);
        let (conn_id, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");
        ctx.break_execution(&conn_id).expect("break");

        let rc = ctx.wait_async(&stmt_id, None).expect("wait");
        assert_eq!(rc, result_code::GENERIC_FAILURE);

        let status = ctx.status(&stmt_id).expect("status");
        assert_eq!(status.code, 1013);
        assert!(status
            .error
            .as_deref()
            .unwrap_or_default()
            .contains("cancel"));
        assert!(asyncs.is_empty());
    }

    #[test]
    fn test_force_wait_and_join_cancels_long_running() {
        let (mut ctx, _, asyncs) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::blocking(&conn);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");
        let rc = ctx
            .force_wait_and_join(&stmt_id, true, None)
            .expect("force join");
        assert_eq!(rc, result_code::SUCCESS);
        assert!(asyncs.is_empty(), "worker joined and record removed");
        assert_eq!(stmt.executions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_statement_drains_outstanding_execution() {
        let (mut ctx, _, asyncs) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::blocking(&conn);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");
        ctx.close_statement(&stmt_id).expect("close");

        assert!(asyncs.is_empty(), "no records may survive a close");
        assert!(stmt.closed.load(Ordering::SeqCst));
        assert!(ctx.status(&stmt_id).is_none());
    }

    #[test]
    fn test_connection_close_joins_all_executions() {
        let (mut ctx, _, asyncs) = new_engine();
        let conn = FakeConn::new();
        let conn_id = ctx.connect(
            conn.as_driver(),
            None,
            ConnectionOptions::new(),
            FailoverPolicy::new(),
            None,
        );

        let mut blockers = Vec::new();
        for _ in 0..2 {
            let stmt = FakeStmt::blocking(&conn);
            let stmt_id = ctx.open_statement(&conn_id).expect("open");
            conn.stage(&stmt);
            ctx.prepare(&stmt_id, "SELECT * FROM big_table").expect("prepare");
            ctx.start_async(&stmt_id, false).expect("start");
            blockers.push(stmt);
        }
        assert_eq!(asyncs.len(), 2);

        ctx.close_connection(&conn_id).expect("close connection");
        assert!(asyncs.is_empty(), "teardown must cancel and join everything");
        assert!(conn.closed.load(Ordering::SeqCst));
    }
}

mod error_capture_tests {
    use super::*;
    use orabridge::DriverError;

    #[test]
    fn test_worker_failure_surfaces_on_wait() {
        let (mut ctx, _, _) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::failing(&conn, DriverError::new(942, "table or view does not exist"));
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");
        let rc = ctx.wait_async(&stmt_id, None).expect("wait");

        assert_eq!(rc, result_code::GENERIC_FAILURE);
        let status = ctx.status(&stmt_id).expect("status");
        assert_eq!(status.code, 942);
        assert_eq!(status.function.as_deref(), Some("executeAsync"));
    }

    #[test]
    fn test_error_readable_after_the_wait() {
        let (mut ctx, _, _) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::failing(&conn, DriverError::new(1400, "cannot insert NULL"));
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");
        ctx.wait_async(&stmt_id, None).expect("wait");

        // a later, unrelated inspection still sees the captured failure
        let status = ctx.status(&stmt_id).expect("status");
        assert_eq!(status.code, 1400);
        assert_eq!(status.error.as_deref(), Some("cannot insert NULL"));
    }
}

mod pending_cycle_tests {
    use super::*;

    #[test]
    fn test_sequential_cycles_do_not_accumulate_pendings() {
        let (mut ctx, _, _) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::dml(&conn, 1);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());
        let live = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            ctx.release_pending(&stmt_id);
            ctx.track_pending(&stmt_id, FakeVar::new(&live)).expect("track");
            ctx.track_pending(&stmt_id, FakeVar::new(&live)).expect("track");
            assert_eq!(ctx.pending_count(&stmt_id), 2);

            ctx.start_async(&stmt_id, false).expect("start");
            let rc = ctx.wait_async(&stmt_id, None).expect("wait");
            assert_eq!(rc, result_code::SUCCESS);

            // the join path forgets the cycle's resources
            assert_eq!(ctx.pending_count(&stmt_id), 0);
            assert_eq!(live.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_restart_reuses_statement_slot() {
        let (mut ctx, _, asyncs) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::dml(&conn, 1);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        for _ in 0..3 {
            ctx.start_async(&stmt_id, false).expect("start");
            assert_eq!(
                ctx.wait_async(&stmt_id, None).expect("wait"),
                result_code::SUCCESS
            );
        }
        assert_eq!(stmt.executions.load(Ordering::SeqCst), 3);
        assert!(asyncs.is_empty());
    }
}

mod teardown_tests {
    use super::*;

    #[test]
    fn test_context_drop_joins_outstanding_workers() {
        let (mut ctx, _, asyncs) = new_engine();
        let conn = FakeConn::new();
        let stmt = FakeStmt::blocking(&conn);
        let (_, stmt_id) = open_prepared(&mut ctx, &conn, &stmt, ConnectionOptions::new());

        ctx.start_async(&stmt_id, false).expect("start");
        drop(ctx);

        assert!(asyncs.is_empty(), "drop must drain every worker");
        assert!(conn.closed.load(Ordering::SeqCst));
    }
}
