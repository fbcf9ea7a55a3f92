use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access token payload. Claim names are shared with every other verifier of
/// the access secret, so they must not change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub iss: String,    // issuer
    pub sub: String,    // account email, empty for oauth-only accounts
    pub uid: Uuid,      // account ID
    pub scopes: String, // opaque authorization scopes
    pub iat: i64,       // issued at (unix timestamp)
    pub exp: i64,       // expires at (unix timestamp)
}

/// Password-reset token payload. Binding to an account comes from the stored
/// copy on the account, not from these claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetClaims {
    pub sub: String, // account email
    pub iat: i64,
    pub exp: i64,
}

/// Only the expiry, read from a token whose signature did not verify.
#[derive(Debug, Deserialize)]
pub(crate) struct UnverifiedExpiry {
    pub exp: Option<i64>,
}

pub(crate) trait Expiring {
    fn expires_at(&self) -> i64;
}

impl Expiring for AccessClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}

impl Expiring for ResetClaims {
    fn expires_at(&self) -> i64 {
        self.exp
    }
}
