use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::model::{Account, LoginType},
    error::AuthError,
};

lazy_static! {
    static ref EMAIL_RE: Regex =
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles");
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Trims and lower-cases, then rejects anything that is not `local@domain.tld`.
pub(crate) fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AuthError::bad_request("Invalid email"));
    }
    Ok(email)
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub message: &'static str,
    pub status_code: u16,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub auth_token: String,
    pub user_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub login_type: LoginType,
}

/// Body of both `logout` and `validate-token`.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub auth_token: String,
    pub user_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ValidateTokenResponse {
    pub user_id: Uuid,
    pub token: String,
    /// Unix seconds.
    pub expiration: i64,
    pub success: bool,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
    pub status_code: u16,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyResetQuery {
    pub email: String,
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

/// Account as shown to its owner. No credentials, no reset state.
#[derive(Debug, Serialize)]
pub struct PublicAccount {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
    pub login_type: LoginType,
    pub oauth_provider: Option<String>,
    pub scopes: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Account> for PublicAccount {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            email: a.email,
            name: a.name,
            avatar_url: a.avatar_url,
            login_type: a.login_type,
            oauth_provider: a.oauth_provider,
            scopes: a.scopes,
            last_login_at: a.last_login_at,
            created_at: a.created_at,
        }
    }
}
