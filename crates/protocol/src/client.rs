//! Client → Server events

use serde::{Deserialize, Serialize};

/// Events sent from client to server over an established connection.
///
/// Authentication happens at connection time (token in the upgrade
/// request), so the only in-band event is a message submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Submit a message to a room. `room` absent means "my current
    /// binding, or a fresh room if I have none".
    #[serde(alias = "submit")]
    Chat {
        #[serde(skip_serializing_if = "Option::is_none")]
        room: Option<String>,
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachment_refs: Vec<String>,
    },
}
