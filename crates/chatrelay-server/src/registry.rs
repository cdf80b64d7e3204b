//! Connection registry for room membership tracking.
//!
//! The registry maintains bidirectional mappings: connection → handle (which
//! carries its room) and room → connection ids (for broadcast). Both maps live
//! behind one mutex so they can never disagree.
//!
//! Rooms are implicit: a room exists exactly while it has at least one
//! member, and an emptied room is indistinguishable from one that never
//! existed.
//!
//! The lock is only ever held for map bookkeeping. Broadcast callers take a
//! [`ConnectionRegistry::snapshot`] and send outside the lock, so connection
//! churn never waits behind client I/O.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chatrelay_proto::RoomName;

use crate::connection::{Connection, ConnectionId};

/// Concurrent-safe registry of live connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// Connection ID → connection handle
    connections: HashMap<ConnectionId, Arc<Connection>>,
    /// Room → set of member connection IDs
    rooms: HashMap<RoomName, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its room.
    ///
    /// Returns `false` (and changes nothing) if a connection with the same id
    /// is already registered.
    pub fn add(&self, connection: Arc<Connection>) -> bool {
        let mut inner = self.lock();
        let id = connection.id();
        if inner.connections.contains_key(&id) {
            return false;
        }

        inner.rooms.entry(connection.room().clone()).or_default().insert(id);
        inner.connections.insert(id, connection);
        true
    }

    /// Remove a connection.
    ///
    /// Returns the handle only to the first caller; removing an absent
    /// connection is a no-op returning `None`. Concurrent failure paths race
    /// on this, and exactly one of them wins.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let mut inner = self.lock();
        let connection = inner.connections.remove(&id)?;

        let room = connection.room();
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }

        Some(connection)
    }

    /// Remove a connection and close it.
    ///
    /// Returns `true` if this call removed it. The connection is closed
    /// either way: closing is idempotent, and a caller holding a handle to an
    /// already-removed connection still wants it shut.
    pub fn evict(&self, connection: &Connection) -> bool {
        let removed = self.remove(connection.id()).is_some();
        connection.close();
        removed
    }

    /// Current members of `room`, copied under the lock.
    ///
    /// Empty for rooms with no members.
    pub fn snapshot(&self, room: &RoomName) -> Vec<Arc<Connection>> {
        let inner = self.lock();
        inner.rooms.get(room).map_or_else(Vec::new, |members| {
            members.iter().filter_map(|id| inner.connections.get(id)).cloned().collect()
        })
    }

    /// Check if a connection is registered.
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().connections.contains_key(&id)
    }

    /// Total number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of connections in `room`.
    pub fn room_member_count(&self, room: &RoomName) -> usize {
        self.lock().rooms.get(room).map_or(0, HashSet::len)
    }

    /// Rooms that currently have at least one member.
    pub fn rooms(&self) -> Vec<RoomName> {
        self.lock().rooms.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // The maps are updated together inside one critical section with no
        // panicking calls in between, so a poisoned guard is still consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
