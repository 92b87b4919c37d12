//! Cross-thread failover notification
//!
//! Recoverable driver errors are reported to the connection's owning
//! context without running host callback logic on the reporting thread.
//! Any thread posts a [`FailoverEvent`] into the owner's [`Mailbox`]; only
//! the owning context's run loop drains it, coalesces repeated failures
//! within the connection's debounce window, and finally invokes the
//! configured callback once with the last message.
//!
//! Delivery is best-effort: events posted after the owning context closed
//! its mailbox are dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Tag passed to failover callbacks for recoverable errors
pub const RECOVERABLE_TAG: &str = "recoverable";

/// Host callback invoked on the owning context's thread with
/// `(connection handle, tag, coalesced message)`
pub type FailoverCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Transient cross-thread message reporting a recoverable driver error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverEvent {
    /// Handle identifier of the affected connection
    pub conn_id: String,
    /// Error text from the driver
    pub message: String,
}

/// Thread-safe event queue owned by one execution context.
///
/// Any thread may enqueue; only the owning context's run loop dequeues.
/// Closing the mailbox (context teardown) discards queued events and turns
/// subsequent posts into no-ops.
pub struct Mailbox {
    queue: Mutex<VecDeque<FailoverEvent>>,
    nonempty: Condvar,
    closed: AtomicBool,
}

impl Mailbox {
    /// Create an open, empty mailbox
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            nonempty: Condvar::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue an event and wake the draining thread.
    /// Returns false when the mailbox has been closed.
    pub fn post(&self, event: FailoverEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            tracing::trace!(conn = %event.conn_id, "dropped failover event, mailbox closed");
            return false;
        }
        let mut queue = self.queue.lock();
        queue.push_back(event);
        self.nonempty.notify_one();
        true
    }

    /// Remove and return all queued events. Returns an empty vec once the
    /// mailbox is closed.
    pub fn drain(&self) -> Vec<FailoverEvent> {
        let mut queue = self.queue.lock();
        if self.closed.load(Ordering::Acquire) {
            queue.clear();
            return Vec::new();
        }
        queue.drain(..).collect()
    }

    /// Block until an event arrives or the timeout elapses.
    /// Returns true when the queue is non-empty.
    pub fn wait_nonempty(&self, timeout: Duration) -> bool {
        let mut queue = self.queue.lock();
        if !queue.is_empty() {
            return true;
        }
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.nonempty.wait_for(&mut queue, timeout);
        !queue.is_empty()
    }

    /// Close the mailbox, discarding anything still queued
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let mut queue = self.queue.lock();
        queue.clear();
        self.nonempty.notify_all();
    }

    /// Whether the mailbox has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
