use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    auth::{
        claims::{AccessClaims, Expiring, ResetClaims, UnverifiedExpiry},
        model::Account,
    },
    config::TokenConfig,
    error::AuthError,
    state::AppState,
};

/// Source of "now" for issuing and expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Result of a successful access-token check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedToken {
    pub account_id: Uuid,
    pub expires_at: i64,
}

/// Mints and verifies access and password-reset tokens (HS256). Each kind has
/// its own secret and lifetime; nothing here is mutated after construction.
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    reset_encoding: EncodingKey,
    reset_decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    reset_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl FromRef<AppState> for Arc<TokenService> {
    fn from_ref(state: &AppState) -> Self {
        state.tokens.clone()
    }
}

impl TokenService {
    pub fn new(cfg: &TokenConfig) -> Self {
        Self::with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn with_clock(cfg: &TokenConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.access_secret.as_bytes()),
            reset_encoding: EncodingKey::from_secret(cfg.reset_secret.as_bytes()),
            reset_decoding: DecodingKey::from_secret(cfg.reset_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            access_ttl: cfg.access_ttl(),
            reset_ttl: cfg.reset_ttl(),
            clock,
        }
    }

    fn now(&self) -> i64 {
        self.clock.now().unix_timestamp()
    }

    fn expiry(iat: i64, ttl: Duration) -> Result<i64, AuthError> {
        i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| iat.checked_add(secs))
            .ok_or_else(|| AuthError::internal(anyhow!("token ttl of {ttl:?} overflows exp")))
    }

    pub fn issue_access_token(&self, account: &Account) -> Result<String, AuthError> {
        let iat = self.now();
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: account.email.clone().unwrap_or_default(),
            uid: account.id,
            scopes: account.scopes.clone(),
            iat,
            exp: Self::expiry(iat, self.access_ttl)?,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.access_encoding)
            .map_err(AuthError::internal)?;
        debug!(account_id = %account.id, "access token issued");
        Ok(token)
    }

    /// Verifies `token` and that it was minted for `expected_account_id`.
    pub fn validate_access_token(
        &self,
        token: &str,
        expected_account_id: Uuid,
    ) -> Result<ValidatedToken, AuthError> {
        let claims: AccessClaims = self.verify(token, &self.access_decoding, Some(&self.issuer))?;
        if claims.uid != expected_account_id {
            warn!(
                token_account_id = %claims.uid,
                expected_account_id = %expected_account_id,
                "access token presented for another account"
            );
            return Err(AuthError::AccountMismatch);
        }
        Ok(ValidatedToken {
            account_id: claims.uid,
            expires_at: claims.exp,
        })
    }

    pub fn issue_password_reset_token(&self, account: &Account) -> Result<String, AuthError> {
        let iat = self.now();
        let claims = ResetClaims {
            sub: account.email.clone().unwrap_or_default(),
            iat,
            exp: Self::expiry(iat, self.reset_ttl)?,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.reset_encoding)
            .map_err(AuthError::internal)?;
        debug!(account_id = %account.id, "password reset token issued");
        Ok(token)
    }

    /// Signature, structure and expiry only. Says nothing about which account
    /// the token belongs to.
    pub fn validate_reset_token_structure(&self, token: &str) -> Result<(), AuthError> {
        self.verify::<ResetClaims>(token, &self.reset_decoding, None)
            .map(|_| ())
    }

    /// Full acceptance check: the token must verify and equal the value
    /// currently stored on the account. An empty stored value never matches.
    pub fn validate_reset_token(&self, token: &str, stored: &str) -> Result<(), AuthError> {
        self.validate_reset_token_structure(token)?;
        if stored.is_empty() || stored != token {
            debug!("reset token does not match the stored value");
            return Err(AuthError::TokenInvalid);
        }
        Ok(())
    }

    fn verify<C>(&self, token: &str, key: &DecodingKey, issuer: Option<&str>) -> Result<C, AuthError>
    where
        C: DeserializeOwned + Expiring,
    {
        let now = self.now();
        match decode::<C>(token, key, &strict_validation(issuer)) {
            Ok(data) if data.claims.expires_at() <= now => Err(AuthError::TokenExpired),
            Ok(data) => Ok(data.claims),
            Err(e) => {
                debug!(error = %e, "token verification failed");
                Err(classify_unverified(token, key, now))
            }
        }
    }
}

fn strict_validation(issuer: Option<&str>) -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    // expiry is compared against the service clock in `verify`
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "iat"]);
    if let Some(iss) = issuer {
        validation.set_issuer(&[iss]);
    }
    validation
}

/// A token that failed verification is still reported as expired when its
/// (unverified) `exp` can be read and lies in the past.
fn classify_unverified(token: &str, key: &DecodingKey, now: i64) -> AuthError {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    match decode::<UnverifiedExpiry>(token, key, &validation) {
        Ok(data) if data.claims.exp.is_some_and(|exp| exp <= now) => AuthError::TokenExpired,
        _ => AuthError::TokenInvalid,
    }
}
