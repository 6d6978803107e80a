//! Connection registry — live connection → (room, identity) bindings.
//!
//! Process-local, in-memory only; rebuilt from scratch on restart.
//! Entries are written only by the event flow owning the connection id,
//! so the map's own sharded locking is all the synchronization needed.

use dashmap::DashMap;

use roomrelay_protocol::Identity;

/// The live association between a connection and a room + identity
#[derive(Debug, Clone)]
pub struct Binding {
    pub room_key: String,
    pub identity: Identity,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    bindings: DashMap<u64, Binding>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any prior binding for the connection. A connection has
    /// at most one room at a time; switching rooms replaces, never
    /// appends.
    pub fn bind(&self, connection_id: u64, room_key: &str, identity: Identity) {
        self.bindings.insert(
            connection_id,
            Binding {
                room_key: room_key.to_string(),
                identity,
            },
        );
    }

    pub fn room_of(&self, connection_id: u64) -> Option<String> {
        self.bindings
            .get(&connection_id)
            .map(|b| b.room_key.clone())
    }

    pub fn identity_of(&self, connection_id: u64) -> Option<Identity> {
        self.bindings
            .get(&connection_id)
            .map(|b| b.identity.clone())
    }

    /// Called exactly once per disconnect.
    pub fn unbind(&self, connection_id: u64) {
        self.bindings.remove(&connection_id);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}
