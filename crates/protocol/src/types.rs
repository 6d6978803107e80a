//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

/// Who authored a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
            TurnRole::System => "system",
        }
    }
}

/// An authenticated identity, owned by the external user store.
/// The relay only reads it: ownership stamps and staleness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub email: String,
    pub is_active: bool,
    /// Unix seconds of the last credential-relevant change
    pub updated_at: i64,
}

/// A persisted conversation room, scoped to one owner identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    /// Client-facing key, unique per owner (not globally)
    pub room_key: String,
    pub title: Option<String>,
    pub owner_id: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

/// One message within a room's history. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub room_id: String,
    pub owner_id: String,
    pub role: TurnRole,
    pub text: String,
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_refs: Vec<String>,
    /// Monotonic within the room, assigned at append time
    pub sequence: i64,
    pub ts: String,
}

/// A turn as it appears inside a `history` event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryItem {
    #[serde(rename = "type")]
    pub role: TurnRole,
    pub text: String,
    pub ts: String,
    #[serde(default)]
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_refs: Vec<String>,
}

impl From<&Turn> for HistoryItem {
    fn from(turn: &Turn) -> Self {
        HistoryItem {
            role: turn.role,
            text: turn.text.clone(),
            ts: turn.ts.clone(),
            is_image: turn.is_image,
            attachment_refs: turn.attachment_refs.clone(),
        }
    }
}

/// A room as it appears inside a `rooms_updated` event payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomView {
    pub room: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Room> for RoomView {
    fn from(room: &Room) -> Self {
        RoomView {
            room: room.room_key.clone(),
            title: room.title.clone(),
            created_at: room.created_at.clone(),
            updated_at: room.updated_at.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_item_serializes_role_under_type_key() {
        let item = HistoryItem {
            role: TurnRole::Assistant,
            text: "hello".into(),
            ts: "0Z".into(),
            is_image: false,
            attachment_refs: vec![],
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["type"], "assistant");
        assert!(json.get("attachment_refs").is_none());
    }

    #[test]
    fn turn_role_round_trips() {
        let json = serde_json::to_string(&TurnRole::User).unwrap();
        assert_eq!(json, "\"user\"");
        let back: TurnRole = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TurnRole::User);
    }
}
