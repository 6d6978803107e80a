//! Error taxonomy for the relay.
//!
//! Only `AuthRejected` ever terminates a connection. Everything else
//! degrades: gateway failures substitute fallback content, persistence
//! failures are logged and the live broadcast stands, invalid submits
//! are dropped.

use thiserror::Error;

use crate::identity::RejectReason;
use crate::persistence::StoreError;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Terminates the connection. No application event reaches the peer.
    #[error("authentication rejected: {0}")]
    AuthRejected(RejectReason),

    /// Input-shape problem. Surfaced as a field-error map over REST;
    /// silently dropped over the socket.
    #[error("validation failed: {field} {code}")]
    ValidationFailed {
        field: &'static str,
        code: &'static str,
    },

    /// Provider exhausted its retries. Recovered locally with fallback
    /// content; never reaches the peer as an error.
    #[error("generation gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Fatal for the current submit's durability guarantee. The
    /// already-sent broadcast is not rolled back.
    #[error("persistence failed: {0}")]
    PersistenceFailed(#[from] StoreError),
}
