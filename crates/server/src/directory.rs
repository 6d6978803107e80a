//! Room directory — persisted room records per owner.
//!
//! Lazy creation on first use, newest-first listing, best-effort AI
//! retitling from recent context, soft delete.

use std::sync::Arc;

use tracing::{debug, info, warn};

use roomrelay_protocol::{Room, RoomView};

use crate::gateway::GenerationGateway;
use crate::persistence::{Store, StoreError};
use crate::room_naming::title_from_summary;

/// Most recent turns fed into title summarization
const RETITLE_CONTEXT_TURNS: usize = 10;

pub struct RoomDirectory {
    store: Store,
    gateway: Arc<dyn GenerationGateway>,
}

impl RoomDirectory {
    pub fn new(store: Store, gateway: Arc<dyn GenerationGateway>) -> Self {
        Self { store, gateway }
    }

    /// Idempotent lookup-or-create by `(owner, room_key)`.
    pub async fn resolve_or_create(
        &self,
        owner_id: &str,
        room_key: &str,
    ) -> Result<Room, StoreError> {
        self.store.resolve_or_create_room(owner_id, room_key).await
    }

    /// The owner's room list, newest-first, excluding soft-deleted rooms.
    /// Always recomputed, never cached.
    pub async fn list_rooms(&self, owner_id: &str) -> Result<Vec<RoomView>, StoreError> {
        let rooms = self.store.list_rooms(owner_id).await?;
        Ok(rooms.iter().map(RoomView::from).collect())
    }

    /// Summarize the room's recent turns into a short title and persist
    /// it. Best-effort: gateway failure leaves the existing title
    /// unchanged and nothing surfaces to the caller.
    pub async fn retitle_from_context(&self, room: &Room) -> Option<String> {
        let turns = match self
            .store
            .replay_turns(&room.id, &room.owner_id, RETITLE_CONTEXT_TURNS)
            .await
        {
            Ok(turns) if !turns.is_empty() => turns,
            Ok(_) => return None,
            Err(e) => {
                debug!(
                    component = "directory",
                    event = "directory.retitle_context_failed",
                    room_id = %room.id,
                    error = %e,
                    "Could not load retitle context"
                );
                return None;
            }
        };

        let context: Vec<String> = turns
            .iter()
            .map(|t| format!("{}: {}", t.role.as_str(), t.text))
            .collect();

        let raw = self.gateway.summarize_title(&context).await?;
        let title = title_from_summary(&raw)?;

        if let Err(e) = self.store.set_room_title(&room.id, &title).await {
            warn!(
                component = "directory",
                event = "directory.retitle_persist_failed",
                room_id = %room.id,
                error = %e,
                "Could not persist new room title"
            );
            return None;
        }

        info!(
            component = "directory",
            event = "directory.room_retitled",
            room_id = %room.id,
            title = %title,
            "Room retitled"
        );
        Some(title)
    }

    /// Soft-delete one room; false when nothing matched.
    pub async fn delete_room(&self, owner_id: &str, room_key: &str) -> Result<bool, StoreError> {
        self.store.delete_room(owner_id, room_key).await
    }

    /// Soft-delete all the owner's rooms; returns the count affected.
    pub async fn clear_rooms(&self, owner_id: &str) -> Result<usize, StoreError> {
        self.store.clear_rooms(owner_id).await
    }
}
