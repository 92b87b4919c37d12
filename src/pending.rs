//! Per-statement pending-resource tracking
//!
//! Each bind or array-bind cycle creates driver-level resources (bound
//! variables, temporary large objects) that must stay alive until the
//! execute that uses them completes. The tracker keeps them per statement
//! handle, releases the batch before a new bind cycle, and forgets the
//! whole entry on statement close or re-prepare.
//!
//! The tracker is owned by the calling context and is never touched by a
//! worker thread; the async engine forgets an entry only after the worker
//! has been joined, because the driver may read the bound variables until
//! its execute call returns.

use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::PendingResource;

/// Pending driver resources, keyed by statement handle identifier
#[derive(Default)]
pub struct PendingResources {
    by_stmt: HashMap<String, Vec<Arc<dyn PendingResource>>>,
}

impl PendingResources {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource to the statement's pending list
    pub fn track(&mut self, stmt_id: &str, resource: Arc<dyn PendingResource>) {
        self.by_stmt
            .entry(stmt_id.to_string())
            .or_default()
            .push(resource);
    }

    /// Release every resource tracked for the statement, keeping the entry
    /// for the next bind cycle
    pub fn release_all(&mut self, stmt_id: &str) {
        if let Some(list) = self.by_stmt.get_mut(stmt_id) {
            let n = list.len();
            list.clear();
            if n > 0 {
                tracing::trace!(stmt = stmt_id, released = n, "released pending resources");
            }
        }
    }

    /// Release and remove the statement's tracking entry entirely.
    /// Calling this for an unknown statement is a no-op.
    pub fn forget(&mut self, stmt_id: &str) {
        if let Some(list) = self.by_stmt.remove(stmt_id) {
            tracing::trace!(
                stmt = stmt_id,
                released = list.len(),
                "forgot pending resources"
            );
        }
    }

    /// Number of resources currently tracked for the statement
    pub fn tracked(&self, stmt_id: &str) -> usize {
        self.by_stmt.get(stmt_id).map_or(0, Vec::len)
    }

    /// Whether the tracker holds no entries at all
    pub fn is_empty(&self) -> bool {
        self.by_stmt.is_empty()
    }
}
