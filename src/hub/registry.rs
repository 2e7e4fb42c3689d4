//! The live set of subscriber connections.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{RegistryError, SendError};
use crate::hub::{Connection, ConnectionId, ConnectionState};

/// Authoritative set of Active connections.
///
/// Every mutation and every broadcast pass runs under one mutex. The
/// critical sections only touch the map and do non-blocking queue pushes,
/// never socket I/O.
#[derive(Debug, Default)]
pub struct Registry {
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Connection>>> {
        // Entries are only inserted or removed whole, a poisoned map is still consistent
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers an Active connection.
    pub fn add(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        let mut connections = self.lock();
        if conn.state() != ConnectionState::Active {
            return Err(RegistryError::NotActive(conn.id()));
        }
        match connections.entry(conn.id()) {
            Entry::Occupied(_) => Err(RegistryError::Duplicate(conn.id())),
            Entry::Vacant(slot) => {
                slot.insert(conn);
                Ok(())
            }
        }
    }

    /// Removes a connection and moves it to `Closing` in the same step.
    ///
    /// Idempotent: only the first call for an id returns `Some`.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.lock();
        let conn = connections.remove(&id)?;
        conn.begin_closing();
        Some(conn)
    }

    /// Current Active connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `deliver` against every registered connection while holding the
    /// lock.
    ///
    /// Connections for which `deliver` fails are removed and moved to
    /// `Closing` before the lock is released, and returned to the caller to
    /// finish closing.
    pub fn broadcast<F>(&self, mut deliver: F) -> Vec<(Arc<Connection>, SendError)>
    where
        F: FnMut(&Connection) -> Result<(), SendError>,
    {
        let mut connections = self.lock();
        let mut failed = Vec::new();
        connections.retain(|_, conn| match deliver(conn) {
            Ok(()) => true,
            Err(err) => {
                conn.begin_closing();
                failed.push((Arc::clone(conn), err));
                false
            }
        });
        failed
    }

    /// Removes every connection, moving each to `Closing`.
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let mut connections = self.lock();
        connections
            .drain()
            .map(|(_, conn)| {
                conn.begin_closing();
                conn
            })
            .collect()
    }
}
