use parley_common::ClientId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Allocate the next connection id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work queued for a connection's task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded JSON text frame to write.
    Frame(String),
    /// Send a transport-level ping and check idleness.
    Probe,
}

/// Handle held in the registry, used to push frames to a connection.
///
/// The registry never owns the connection; dropping a handle does not close
/// anything. Closure is driven by the session's transport.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Identity of the underlying transport connection.
    pub conn_id: ConnId,
    /// Identifier this connection authenticated as.
    pub client_id: ClientId,
    /// Channel into the connection's task.
    pub tx: mpsc::Sender<Outbound>,
    /// When the transport connection was accepted.
    pub connected_at: Instant,
}

impl ConnHandle {
    /// Returns `true` while the connection task is still receiving.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Concurrent identifier → connection table.
///
/// The single source of truth for "is X online". Every operation holds one
/// mutex for its whole duration.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    routes: Mutex<HashMap<ClientId, ConnHandle>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<ClientId, ConnHandle>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite the mapping for the handle's identifier,
    /// returning the handle it replaced. Last writer wins.
    pub fn register(&self, handle: ConnHandle) -> Option<ConnHandle> {
        self.routes().insert(handle.client_id.clone(), handle)
    }

    /// Remove the mapping only if it still points at `conn_id`.
    ///
    /// Returns `true` if an entry was removed. A stale connection closing
    /// after its identifier re-authenticated elsewhere is a no-op.
    pub fn unregister(&self, client_id: &ClientId, conn_id: ConnId) -> bool {
        let mut routes = self.routes();
        match routes.get(client_id) {
            Some(current) if current.conn_id == conn_id => {
                routes.remove(client_id);
                true
            }
            _ => false,
        }
    }

    /// Look up the live connection for an identifier.
    #[must_use]
    pub fn lookup(&self, client_id: &ClientId) -> Option<ConnHandle> {
        self.routes().get(client_id).cloned()
    }

    /// Snapshot of every registered identifier.
    #[must_use]
    pub fn all_identifiers(&self) -> Vec<ClientId> {
        self.routes().keys().cloned().collect()
    }

    /// Number of registered identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes().len()
    }

    /// Returns `true` if nobody is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes().is_empty()
    }
}
