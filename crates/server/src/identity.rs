//! Bearer-credential verification.
//!
//! Connections authenticate once, synchronously with connect. A
//! credential is an HMAC-signed JWT carrying the identity reference
//! (`sub`), issue time (`iat`), expiry (`exp`), and a revocation id
//! (`jti`). Rejection closes the connection at the transport level;
//! no application event reaches the peer.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use roomrelay_protocol::Identity;

use crate::persistence::{Store, StoreError};

/// Why a credential was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoCredential,
    InvalidSignature,
    UnknownIdentity,
    /// Issued before the identity's last credential change (minus skew)
    Stale,
    Revoked,
    Inactive,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::NoCredential => "no_credential",
            RejectReason::InvalidSignature => "invalid_signature",
            RejectReason::UnknownIdentity => "unknown_identity",
            RejectReason::Stale => "stale",
            RejectReason::Revoked => "revoked",
            RejectReason::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// Claims carried by a bearer credential
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub jti: String,
}

/// Lookup into the external user store
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError>;
}

/// Membership test against the revocation set
#[async_trait]
pub trait RevocationSet: Send + Sync {
    async fn contains(&self, jti: &str) -> Result<bool, StoreError>;
}

#[async_trait]
impl IdentityStore for Store {
    async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
        self.find_identity(id).await
    }
}

#[async_trait]
impl RevocationSet for Store {
    async fn contains(&self, jti: &str) -> Result<bool, StoreError> {
        self.is_token_revoked(jti).await
    }
}

/// Read-only credential check. Deterministic given the same inputs and
/// store state.
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
    identities: Arc<dyn IdentityStore>,
    revocations: Arc<dyn RevocationSet>,
    skew_tolerance_secs: u64,
}

impl TokenVerifier {
    pub fn new(
        secret: &str,
        identities: Arc<dyn IdentityStore>,
        revocations: Arc<dyn RevocationSet>,
        skew_tolerance_secs: u64,
    ) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
            identities,
            revocations,
            skew_tolerance_secs,
        }
    }

    /// Validate a credential and return the authenticated identity.
    ///
    /// A store failure during lookup rejects the credential as
    /// `UnknownIdentity` / `Revoked`; the check must never pass open.
    pub async fn verify(&self, credential: Option<&str>) -> Result<Identity, RejectReason> {
        let token = match credential.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => token,
            None => return Err(RejectReason::NoCredential),
        };

        let claims = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(
                    component = "identity",
                    event = "identity.decode_failed",
                    error = %e,
                    "Credential decode failed"
                );
                RejectReason::InvalidSignature
            })?;

        let identity = match self.identities.find_by_id(&claims.sub).await {
            Ok(Some(identity)) => identity,
            Ok(None) => return Err(RejectReason::UnknownIdentity),
            Err(_) => return Err(RejectReason::UnknownIdentity),
        };

        // Credentials minted before the identity's last update are dead,
        // allowing for clock skew between minting and storing services.
        if (claims.iat + self.skew_tolerance_secs) < identity.updated_at.max(0) as u64 {
            return Err(RejectReason::Stale);
        }

        match self.revocations.contains(&claims.jti).await {
            Ok(false) => {}
            Ok(true) | Err(_) => return Err(RejectReason::Revoked),
        }

        if !identity.is_active {
            return Err(RejectReason::Inactive);
        }

        Ok(identity)
    }
}

#[cfg(test)]
pub(crate) fn mint_token(secret: &str, sub: &str, jti: &str, iat: u64, ttl_secs: u64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: sub.to_string(),
        iat,
        exp: iat + ttl_secs,
        jti: jti.to_string(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encoding")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    use roomrelay_protocol::now_unix;

    const SECRET: &str = "test-secret";

    struct MemIdentities(Mutex<Vec<Identity>>);

    #[async_trait]
    impl IdentityStore for MemIdentities {
        async fn find_by_id(&self, id: &str) -> Result<Option<Identity>, StoreError> {
            Ok(self.0.lock().unwrap().iter().find(|i| i.id == id).cloned())
        }
    }

    struct MemRevocations(Mutex<HashSet<String>>);

    #[async_trait]
    impl RevocationSet for MemRevocations {
        async fn contains(&self, jti: &str) -> Result<bool, StoreError> {
            Ok(self.0.lock().unwrap().contains(jti))
        }
    }

    fn verifier_with(identities: Vec<Identity>, revoked: &[&str]) -> TokenVerifier {
        TokenVerifier::new(
            SECRET,
            Arc::new(MemIdentities(Mutex::new(identities))),
            Arc::new(MemRevocations(Mutex::new(
                revoked.iter().map(|s| s.to_string()).collect(),
            ))),
            60,
        )
    }

    fn identity(id: &str, updated_at: i64) -> Identity {
        Identity {
            id: id.to_string(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            is_active: true,
            updated_at,
        }
    }

    #[tokio::test]
    async fn accepts_a_valid_credential() {
        let verifier = verifier_with(vec![identity("u1", 0)], &[]);
        let token = mint_token(SECRET, "u1", "jti-1", now_unix() as u64, 3600);
        let got = verifier.verify(Some(&token)).await.unwrap();
        assert_eq!(got.id, "u1");
    }

    #[tokio::test]
    async fn rejects_missing_credential() {
        let verifier = verifier_with(vec![], &[]);
        assert_eq!(
            verifier.verify(None).await.unwrap_err(),
            RejectReason::NoCredential
        );
        assert_eq!(
            verifier.verify(Some("  ")).await.unwrap_err(),
            RejectReason::NoCredential
        );
    }

    #[tokio::test]
    async fn rejects_bad_signature() {
        let verifier = verifier_with(vec![identity("u1", 0)], &[]);
        let token = mint_token("other-secret", "u1", "jti-1", now_unix() as u64, 3600);
        assert_eq!(
            verifier.verify(Some(&token)).await.unwrap_err(),
            RejectReason::InvalidSignature
        );
    }

    #[tokio::test]
    async fn rejects_expired_credential_as_invalid() {
        let verifier = verifier_with(vec![identity("u1", 0)], &[]);
        let token = mint_token(SECRET, "u1", "jti-1", (now_unix() - 7200) as u64, 60);
        assert_eq!(
            verifier.verify(Some(&token)).await.unwrap_err(),
            RejectReason::InvalidSignature
        );
    }

    #[tokio::test]
    async fn rejects_unknown_identity() {
        let verifier = verifier_with(vec![], &[]);
        let token = mint_token(SECRET, "ghost", "jti-1", now_unix() as u64, 3600);
        assert_eq!(
            verifier.verify(Some(&token)).await.unwrap_err(),
            RejectReason::UnknownIdentity
        );
    }

    #[tokio::test]
    async fn staleness_boundary_is_exact() {
        let iat = now_unix() as u64;

        // iat + 60 == updated_at: still acceptable
        let verifier = verifier_with(vec![identity("u1", (iat + 60) as i64)], &[]);
        let token = mint_token(SECRET, "u1", "jti-1", iat, 3600);
        assert!(verifier.verify(Some(&token)).await.is_ok());

        // one second past the tolerance: stale
        let verifier = verifier_with(vec![identity("u1", (iat + 61) as i64)], &[]);
        let token = mint_token(SECRET, "u1", "jti-2", iat, 3600);
        assert_eq!(
            verifier.verify(Some(&token)).await.unwrap_err(),
            RejectReason::Stale
        );
    }

    #[tokio::test]
    async fn rejects_revoked_credential() {
        let verifier = verifier_with(vec![identity("u1", 0)], &["jti-dead"]);
        let token = mint_token(SECRET, "u1", "jti-dead", now_unix() as u64, 3600);
        assert_eq!(
            verifier.verify(Some(&token)).await.unwrap_err(),
            RejectReason::Revoked
        );
    }

    #[tokio::test]
    async fn rejects_inactive_identity() {
        let mut inactive = identity("u1", 0);
        inactive.is_active = false;
        let verifier = verifier_with(vec![inactive], &[]);
        let token = mint_token(SECRET, "u1", "jti-1", now_unix() as u64, 3600);
        assert_eq!(
            verifier.verify(Some(&token)).await.unwrap_err(),
            RejectReason::Inactive
        );
    }
}
