//! History replay with a process-scoped fallback buffer.
//!
//! The durable turn log lives in the store; every broadcast turn is
//! also appended to an in-memory ring buffer so the live view survives
//! a persistence failure. The buffer is shared across all rooms and
//! trimmed FIFO by global insertion order, so heavy traffic in one room
//! can evict another room's recent entries (retained capacity
//! management, see DESIGN.md).

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::warn;

use roomrelay_protocol::{HistoryItem, TurnRole};

use crate::persistence::{Store, StoreError};

/// One in-memory turn record
#[derive(Debug, Clone)]
pub struct FallbackTurn {
    pub room_key: String,
    pub role: TurnRole,
    pub text: String,
    pub is_image: bool,
    pub ts: String,
}

/// Bounded ring buffer of recent turns across all rooms.
/// Constructed at process start and injected; never a global.
pub struct FallbackBuffer {
    entries: Mutex<VecDeque<FallbackTurn>>,
    capacity: usize,
}

impl FallbackBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn append(&self, turn: FallbackTurn) {
        let mut entries = self.entries.lock().expect("fallback buffer poisoned");
        entries.push_back(turn);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// The last `limit` surviving entries for a room, oldest-first.
    pub fn replay(&self, room_key: &str, limit: usize) -> Vec<FallbackTurn> {
        let entries = self.entries.lock().expect("fallback buffer poisoned");
        let mut items: Vec<FallbackTurn> = entries
            .iter()
            .rev()
            .filter(|t| t.room_key == room_key)
            .take(limit)
            .cloned()
            .collect();
        items.reverse();
        items
    }
}

/// Append-only ordered turn log per room, with bounded-window replay.
pub struct HistoryStore {
    store: Store,
    fallback: FallbackBuffer,
    replay_limit: usize,
}

impl HistoryStore {
    pub fn new(store: Store, fallback_capacity: usize, replay_limit: usize) -> Self {
        Self {
            store,
            fallback: FallbackBuffer::new(fallback_capacity),
            replay_limit,
        }
    }

    /// Record a turn in the live-view buffer. Called at broadcast time,
    /// before the durable append, so peers and reconnects see the same
    /// conversation even if persistence later fails.
    pub fn record_live(&self, turn: FallbackTurn) {
        self.fallback.append(turn);
    }

    /// Durable append. Failure is fatal for the enclosing submit's
    /// durability guarantee and surfaces to the caller.
    pub async fn append(
        &self,
        room_id: &str,
        owner_id: &str,
        role: TurnRole,
        text: &str,
        is_image: bool,
        attachment_refs: &[String],
    ) -> Result<(), StoreError> {
        self.store
            .append_turn(room_id, owner_id, role, text, is_image, attachment_refs)
            .await
            .map(|_| ())
    }

    /// Bounded-window replay, oldest-first. Falls back to the in-memory
    /// buffer when the durable log has nothing for a room with live
    /// traffic.
    pub async fn replay(&self, room_id: &str, owner_id: &str, room_key: &str) -> Vec<HistoryItem> {
        match self.store.replay_turns(room_id, owner_id, self.replay_limit).await {
            Ok(turns) if !turns.is_empty() => turns.iter().map(HistoryItem::from).collect(),
            Ok(_) => self.replay_from_fallback(room_key),
            Err(e) => {
                warn!(
                    component = "history",
                    event = "history.replay_failed",
                    room_id = %room_id,
                    error = %e,
                    "Durable replay failed, serving fallback buffer"
                );
                self.replay_from_fallback(room_key)
            }
        }
    }

    fn replay_from_fallback(&self, room_key: &str) -> Vec<HistoryItem> {
        self.fallback
            .replay(room_key, self.replay_limit)
            .into_iter()
            .map(|t| HistoryItem {
                role: t.role,
                text: t.text,
                ts: t.ts,
                is_image: t.is_image,
                attachment_refs: vec![],
            })
            .collect()
    }
}
