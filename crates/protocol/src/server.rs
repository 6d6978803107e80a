//! Server → Client events

use serde::{Deserialize, Serialize};

use crate::types::{HistoryItem, RoomView};

/// Events sent from server to client.
///
/// `User` and `Assistant` are the live chat broadcasts; `History` replays
/// a bounded window on join; `System`/`SystemClear` manage the
/// "no messages yet" placeholder lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent to a joining connection once its room is resolved.
    /// Idempotent: harmless if the room already existed.
    RoomCreated {
        room: String,
        ts: String,
    },

    /// Bounded replay window, oldest-first, sent to the joiner only
    History {
        items: Vec<HistoryItem>,
        ts: String,
    },

    /// Placeholder shown while a room has no history yet
    System {
        text: String,
        ts: String,
    },

    /// Discard a previously shown placeholder
    SystemClear {
        ts: String,
    },

    /// A user turn, broadcast to every connection in the room
    User {
        text: String,
        ts: String,
        room: String,
        is_image: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_refs: Vec<String>,
    },

    /// An assistant turn (text or an image reference)
    Assistant {
        text: String,
        ts: String,
        room: String,
        is_image: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_refs: Vec<String>,
    },

    /// The owner's full room list, newest-first, recomputed after a mutation
    RoomsUpdated {
        rooms: Vec<RoomView>,
    },

    /// Transport-level failures only (malformed frames). Invalid but
    /// well-formed submits are dropped silently instead.
    Error {
        code: String,
        message: String,
    },
}
