//! Roomrelay Protocol
//!
//! Shared types for communication between the roomrelay server and clients.
//! These types are serialized as JSON over WebSocket.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

pub mod client;
pub mod server;
pub mod types;

pub use client::ClientEvent;
pub use server::ServerEvent;
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a fresh room key: `room-<32 lowercase hex chars>`
pub fn new_room_key() -> String {
    format!("room-{}", Uuid::new_v4().simple())
}

/// Current time as a compact UTC timestamp string
pub fn now_ts() -> String {
    format!("{}Z", now_unix())
}

/// Current time as unix seconds
pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_key_matches_expected_pattern() {
        let key = new_room_key();
        let hex = key.strip_prefix("room-").expect("room- prefix");
        assert_eq!(hex.len(), 32);
        assert!(hex
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn room_keys_are_unique() {
        assert_ne!(new_room_key(), new_room_key());
    }
}
