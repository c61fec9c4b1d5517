use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::db::models::RoomId;

use super::connection::Connection;
use super::events::ConnectionId;

/// Result of removing a connection from a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vacancy {
    /// Other connections remain.
    Occupied,
    /// That was the last connection; the room entry is gone.
    Emptied,
    /// The connection was not registered in that room.
    NotRegistered,
}

/// In-memory map of room → live connections. Never persisted.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: DashMap<RoomId, HashMap<ConnectionId, Arc<Connection>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room. Returns false if it was already there.
    pub fn register(&self, room_id: RoomId, conn: Arc<Connection>) -> bool {
        self.rooms
            .entry(room_id)
            .or_default()
            .insert(conn.id, conn)
            .is_none()
    }

    /// Remove a connection from a room. The room entry is dropped in the same
    /// critical section as its last connection, so exactly one caller sees
    /// [`Vacancy::Emptied`] per emptying.
    pub fn deregister(&self, room_id: RoomId, conn_id: ConnectionId) -> Vacancy {
        match self.rooms.entry(room_id) {
            Entry::Vacant(_) => Vacancy::NotRegistered,
            Entry::Occupied(mut entry) => {
                if entry.get_mut().remove(&conn_id).is_none() {
                    Vacancy::NotRegistered
                } else if entry.get().is_empty() {
                    entry.remove();
                    Vacancy::Emptied
                } else {
                    Vacancy::Occupied
                }
            }
        }
    }

    /// Connections currently registered in a room (empty if the room is unknown).
    pub fn connections_of(&self, room_id: RoomId) -> Vec<Arc<Connection>> {
        self.rooms
            .get(&room_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self, room_id: RoomId) -> bool {
        self.rooms
            .get(&room_id)
            .is_none_or(|conns| conns.is_empty())
    }

    pub fn contains(&self, room_id: RoomId, conn_id: ConnectionId) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|conns| conns.contains_key(&conn_id))
    }

    /// Number of rooms with at least one connection.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
