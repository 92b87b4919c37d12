//! Process-wide connection sharing
//!
//! A connection created in one execution context can be used, read-only,
//! from another context in the same process. The owning context publishes
//! the raw driver connection here; other contexts adopt it by cloning the
//! reference. Only the owner closes the underlying connection, and it
//! flips the owner-alive flag first so a concurrent adoption fails fast
//! instead of racing the close.
//!
//! The map lock is held for pointer and flag bookkeeping only, never
//! across a driver call.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::DriverConnection;

struct SharedEntry {
    conn: Arc<dyn DriverConnection>,
    owner_alive: bool,
}

/// Map from connection handle identifier to the shared driver connection
#[derive(Default)]
pub struct SharedConnectionMap {
    inner: Mutex<HashMap<String, SharedEntry>>,
}

impl SharedConnectionMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly created connection and mark its owner alive.
    /// Called once by the owning context; re-publishing an identifier
    /// replaces the previous entry.
    pub fn publish(&self, id: &str, conn: Arc<dyn DriverConnection>) {
        let mut map = self.inner.lock();
        map.insert(
            id.to_string(),
            SharedEntry {
                conn,
                owner_alive: true,
            },
        );
        tracing::debug!(conn = id, "published shared connection");
    }

    /// Look up a published connection. Returns the driver connection and
    /// whether the owning context is still alive; adopters must only
    /// proceed when the flag is set.
    pub fn lookup(&self, id: &str) -> Option<(Arc<dyn DriverConnection>, bool)> {
        let map = self.inner.lock();
        map.get(id)
            .map(|entry| (Arc::clone(&entry.conn), entry.owner_alive))
    }

    /// Flip the owner-alive flag off. The owner calls this right before
    /// closing the underlying driver connection.
    pub fn mark_owner_gone(&self, id: &str) {
        let mut map = self.inner.lock();
        if let Some(entry) = map.get_mut(id) {
            entry.owner_alive = false;
            tracing::debug!(conn = id, "marked shared connection owner gone");
        }
    }

    /// Remove the entry after the owner's close has completed
    pub fn erase(&self, id: &str) {
        let mut map = self.inner.lock();
        if map.remove(id).is_some() {
            tracing::debug!(conn = id, "erased shared connection");
        }
    }

    /// Number of published connections
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
