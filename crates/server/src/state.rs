//! Process-scoped application state.
//!
//! Constructed once at startup, torn down at process stop, and injected
//! into handlers; never ambient globals.

use std::sync::Arc;

use crate::directory::RoomDirectory;
use crate::identity::TokenVerifier;
use crate::relay::Relay;

pub struct AppState {
    pub relay: Relay,
    pub verifier: TokenVerifier,
    pub directory: Arc<RoomDirectory>,
}
