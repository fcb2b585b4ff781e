//! Connection Registry
//!
//! Tracks the live client connections of one worker process. A connection is
//! in the registry iff it has been accepted and its request has not completed.
//!
//! The worker thread calls `track`/`untrack`; the signal thread calls
//! `snapshot_and_clear` during drain. All operations are total: absent or
//! duplicate entries never error, and lock acquisition ignores poison so the
//! drain still works after a panic elsewhere.

use crate::connection::{Conn, ConnId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

pub struct ConnectionRegistry {
    live: Mutex<HashMap<ConnId, Box<dyn Conn>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnId, Box<dyn Conn>>> {
        // Ignore mutex poison: the drain must still close clients after a panic
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a freshly accepted connection, making it visible to drain.
    pub fn track(&self, conn: Box<dyn Conn>) {
        self.lock().insert(conn.id(), conn);
    }

    /// Remove a connection after its request completed. No-op if absent:
    /// normal completion may race with a drain that already snapshotted it.
    pub fn untrack(&self, id: ConnId) {
        self.lock().remove(&id);
    }

    /// Swap the live set for an empty one and return the snapshot.
    ///
    /// Drain iterates the snapshot, never the live set, so no connection can
    /// be drained twice and tracking can continue safely underneath.
    pub fn snapshot_and_clear(&self) -> Vec<Box<dyn Conn>> {
        let mut live = self.lock();
        std::mem::take(&mut *live).into_values().collect()
    }

    /// Advisory count of live connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::next_conn_id;

    struct StubConn {
        id: ConnId,
    }

    impl StubConn {
        fn boxed() -> (ConnId, Box<dyn Conn>) {
            let id = next_conn_id();
            (id, Box::new(StubConn { id }))
        }
    }

    impl Conn for StubConn {
        fn id(&self) -> ConnId {
            self.id
        }

        fn peer(&self) -> String {
            format!("stub-{}", self.id)
        }

        fn send_all(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
            Ok(())
        }

        fn close(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_track_untrack() {
        let registry = ConnectionRegistry::new();
        let (a, conn_a) = StubConn::boxed();
        let (_b, conn_b) = StubConn::boxed();

        registry.track(conn_a);
        registry.track(conn_b);
        assert_eq!(registry.len(), 2);

        registry.untrack(a);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_untrack_absent_is_noop() {
        let registry = ConnectionRegistry::new();
        let (_a, conn) = StubConn::boxed();
        registry.track(conn);

        registry.untrack(999_999);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_and_clear_empties_registry() {
        let registry = ConnectionRegistry::new();
        let (_a, conn_a) = StubConn::boxed();
        let (_b, conn_b) = StubConn::boxed();
        registry.track(conn_a);
        registry.track(conn_b);

        let snapshot = registry.snapshot_and_clear();
        assert_eq!(snapshot.len(), 2);
        assert!(registry.is_empty());

        // A second snapshot sees nothing: no connection is double-drained
        assert!(registry.snapshot_and_clear().is_empty());
    }

    #[test]
    fn test_untrack_after_snapshot_is_noop() {
        let registry = ConnectionRegistry::new();
        let (a, conn) = StubConn::boxed();
        registry.track(conn);

        let snapshot = registry.snapshot_and_clear();
        assert_eq!(snapshot.len(), 1);

        // The worker finishing its request after drain snapshotted
        registry.untrack(a);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_track_from_many_threads() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(ConnectionRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(thread::spawn(move || {
                for _ in 0..50 {
                    let (_, conn) = StubConn::boxed();
                    registry.track(conn);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 400);
    }
}
