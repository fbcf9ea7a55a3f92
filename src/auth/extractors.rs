use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use uuid::Uuid;

use super::tokens::{TokenService, ValidatedToken};
use crate::error::AuthError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Bearer token plus `X-User-Id`, validated against each other.
pub struct AuthAccount(pub ValidatedToken);

#[async_trait]
impl<S> FromRequestParts<S> for AuthAccount
where
    Arc<TokenService>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .ok_or(AuthError::Unauthenticated("Missing Authorization header"))?;

        let token = auth
            .strip_prefix("Bearer ")
            .or_else(|| auth.strip_prefix("bearer "))
            .ok_or(AuthError::Unauthenticated("Invalid auth scheme"))?;

        let account_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or(AuthError::Unauthenticated("Missing or invalid X-User-Id header"))?;

        let tokens = Arc::<TokenService>::from_ref(state);
        let validated = tokens.validate_access_token(token.trim(), account_id)?;
        Ok(AuthAccount(validated))
    }
}
