//! Room relay — orchestrates connect, submit, and disconnect across
//! all rooms.
//!
//! Process-scoped state (room actors, connection bindings) is
//! constructed at startup and injected, never ambient. Authentication
//! happens before a connection ever reaches the relay; everything here
//! assumes a verified identity.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, oneshot};
use tracing::{info, warn};

use roomrelay_protocol::{new_room_key, now_ts, Identity, ServerEvent};

use crate::directory::RoomDirectory;
use crate::error::RelayError;
use crate::gateway::GenerationGateway;
use crate::history::HistoryStore;
use crate::registry::ConnectionRegistry;
use crate::room_actor::{describe_identity, RoomActorHandle, RoomCommand};

/// What a connection needs after binding to a room: the resolved key,
/// events addressed to it alone, and its broadcast subscription.
pub struct JoinOutcome {
    pub room_key: String,
    pub events: Vec<ServerEvent>,
    pub rx: broadcast::Receiver<ServerEvent>,
}

pub struct Relay {
    rooms: DashMap<(String, String), RoomActorHandle>,
    registry: ConnectionRegistry,
    directory: Arc<RoomDirectory>,
    history: Arc<HistoryStore>,
    gateway: Arc<dyn GenerationGateway>,
    gateway_timeout: Duration,
}

impl Relay {
    pub fn new(
        directory: Arc<RoomDirectory>,
        history: Arc<HistoryStore>,
        gateway: Arc<dyn GenerationGateway>,
        gateway_timeout: Duration,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            registry: ConnectionRegistry::new(),
            directory,
            history,
            gateway,
            gateway_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Resolve (or lazily create) the room record and its actor.
    async fn room_handle(
        &self,
        owner: &Identity,
        room_key: &str,
    ) -> Result<RoomActorHandle, RelayError> {
        let map_key = (owner.id.clone(), room_key.to_string());
        if let Some(handle) = self.rooms.get(&map_key) {
            return Ok(handle.clone());
        }

        let room = self.directory.resolve_or_create(&owner.id, room_key).await?;
        let handle = self
            .rooms
            .entry(map_key)
            .or_insert_with(|| {
                RoomActorHandle::spawn(
                    room,
                    self.history.clone(),
                    self.directory.clone(),
                    self.gateway.clone(),
                    self.gateway_timeout,
                )
            })
            .clone();
        Ok(handle)
    }

    /// Bind an authenticated connection to a room (fresh key if none
    /// requested), join its broadcast group, and resolve what the
    /// joiner should see.
    pub async fn connect(
        &self,
        connection_id: u64,
        identity: Identity,
        requested_room: Option<String>,
    ) -> Result<JoinOutcome, RelayError> {
        let room_key = requested_room
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(new_room_key);

        let handle = self.room_handle(&identity, &room_key).await?;
        self.registry.bind(connection_id, &room_key, identity.clone());

        let rx = handle.subscribe();
        let (reply_tx, reply_rx) = oneshot::channel();
        handle.send(RoomCommand::Join { reply: reply_tx }).await;
        let events = reply_rx.await.unwrap_or_default();

        info!(
            component = "relay",
            event = "relay.connection.bound",
            connection_id = connection_id,
            room_key = %room_key,
            identity = %describe_identity(&identity),
            "Connection bound to room"
        );

        Ok(JoinOutcome {
            room_key,
            events,
            rx,
        })
    }

    /// Route a submit to the connection's effective room, rebinding
    /// first when the payload names a different room. Returns the new
    /// join outcome when a rebind happened so the transport can move
    /// its broadcast subscription.
    pub async fn submit(
        &self,
        connection_id: u64,
        room: Option<String>,
        text: String,
        attachment_refs: Vec<String>,
    ) -> Result<Option<JoinOutcome>, RelayError> {
        let Some(identity) = self.registry.identity_of(connection_id) else {
            warn!(
                component = "relay",
                event = "relay.submit.unbound_connection",
                connection_id = connection_id,
                "Submit from a connection with no binding, dropping"
            );
            return Ok(None);
        };

        // Blank submissions never create rooms, broadcasts, or turns
        if text.trim().is_empty() {
            return Ok(None);
        }

        let current = self.registry.room_of(connection_id);
        let effective = room
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .or_else(|| current.clone())
            .unwrap_or_else(new_room_key);

        let handle = self.room_handle(&identity, &effective).await?;

        let rebound = if current.as_deref() != Some(effective.as_str()) {
            self.registry
                .bind(connection_id, &effective, identity.clone());
            info!(
                component = "relay",
                event = "relay.connection.rebound",
                connection_id = connection_id,
                from_room = ?current,
                to_room = %effective,
                "Connection switched rooms"
            );
            Some(JoinOutcome {
                room_key: effective.clone(),
                events: vec![ServerEvent::RoomCreated {
                    room: effective.clone(),
                    ts: now_ts(),
                }],
                rx: handle.subscribe(),
            })
        } else {
            None
        };

        handle
            .send(RoomCommand::Submit {
                text,
                attachment_refs,
            })
            .await;

        Ok(rebound)
    }

    /// Called exactly once per disconnect. In-flight generation for the
    /// room is unaffected; this connection simply stops receiving.
    pub fn disconnect(&self, connection_id: u64) {
        self.registry.unbind(connection_id);
        info!(
            component = "relay",
            event = "relay.connection.unbound",
            connection_id = connection_id,
            "Connection unbound"
        );
    }
}
