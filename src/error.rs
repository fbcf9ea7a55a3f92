use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::auth::{model::LoginType, store::StoreError};

/// Which identity a conflicting account already owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Email,
    OAuthIdentity,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Email => f.write_str("email"),
            ConflictKind::OAuthIdentity => f.write_str("oauth identity"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Unknown email and wrong password look the same.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("Account must sign in with {}", .provider.as_deref().unwrap_or("email and password"))]
    AccountLoginTypeMismatch {
        login_type: LoginType,
        provider: Option<String>,
    },

    #[error("JWT_TOKEN_INVALID")]
    TokenInvalid,

    #[error("JWT_TOKEN_EXPIRED")]
    TokenExpired,

    #[error("Token does not belong to this account")]
    AccountMismatch,

    #[error("An account already exists with this {0}")]
    AccountConflict(ConflictKind),

    #[error("{0}")]
    BadRequest(String),

    /// The cause is for server logs only; callers see a fixed message.
    #[error("Internal Server Error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        AuthError::Internal(err.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        AuthError::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials | AuthError::Unauthenticated(_) => {
                StatusCode::UNAUTHORIZED
            }
            AuthError::AccountLoginTypeMismatch { .. }
            | AuthError::TokenInvalid
            | AuthError::TokenExpired
            | AuthError::AccountMismatch
            | AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::AccountConflict(_) => StatusCode::CONFLICT,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Store failures reaching a caller are internal; call sites that care about
/// uniqueness violations match on them before converting.
impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::internal(err)
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub error_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_type: Option<LoginType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let AuthError::Internal(cause) = &self {
            error!(error = ?cause, "internal error");
        }
        let (login_type, provider) = match &self {
            AuthError::AccountLoginTypeMismatch {
                login_type,
                provider,
            } => (Some(*login_type), provider.clone()),
            _ => (None, None),
        };
        let body = ErrorBody {
            message: self.to_string(),
            error_code: status.as_u16(),
            login_type,
            provider,
        };
        (status, Json(body)).into_response()
    }
}
