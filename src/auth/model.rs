use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

pub const DEFAULT_SCOPES: &str = "user";

/// Which authentication methods an account may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoginType {
    #[serde(rename = "email_pass")]
    EmailPassword,
    #[serde(rename = "oauth_otp")]
    OAuthAndEmail,
    #[serde(rename = "oauth_only")]
    OAuthOnly,
}

impl LoginType {
    /// Column value stored in `accounts.login_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            LoginType::EmailPassword => "email_pass",
            LoginType::OAuthAndEmail => "oauth_otp",
            LoginType::OAuthOnly => "oauth_only",
        }
    }
}

impl fmt::Display for LoginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown login type: {0}")]
pub struct UnknownLoginType(pub String);

impl TryFrom<String> for LoginType {
    type Error = UnknownLoginType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "email_pass" => Ok(LoginType::EmailPassword),
            "oauth_otp" => Ok(LoginType::OAuthAndEmail),
            "oauth_only" => Ok(LoginType::OAuthOnly),
            _ => Err(UnknownLoginType(value)),
        }
    }
}

/// Account record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: Option<String>,
    pub password_hash: Option<String>, // argon2 PHC string, email_pass only
    pub oauth_provider: Option<String>,
    pub oauth_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub login_type: LoginType,
    pub name: String,
    pub avatar_url: Option<String>,
    pub scopes: String,
    /// Empty when no reset is outstanding.
    pub forgot_password_token: String,
    pub last_login_at: Option<OffsetDateTime>,
    pub password_changed_at: Option<OffsetDateTime>,
    pub is_deleted: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Insert payload. Only the constructors below build one, so every new row
/// carries exactly the credential fields its login type allows.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub oauth_provider: Option<String>,
    pub oauth_id: Option<String>,
    pub login_type: LoginType,
    pub name: String,
    pub avatar_url: Option<String>,
    pub scopes: String,
}

impl NewAccount {
    pub fn email_password(email: &str, password_hash: String, name: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: Some(email.to_owned()),
            password_hash: Some(password_hash),
            oauth_provider: None,
            oauth_id: None,
            login_type: LoginType::EmailPassword,
            name: name.unwrap_or_default(),
            avatar_url: None,
            scopes: DEFAULT_SCOPES.into(),
        }
    }

    /// `OAuthAndEmail` when the provider vouched for an email, `OAuthOnly` otherwise.
    pub fn from_profile(profile: &ProfileInfo) -> Self {
        let login_type = match profile.email {
            Some(_) => LoginType::OAuthAndEmail,
            None => LoginType::OAuthOnly,
        };
        Self {
            id: Uuid::new_v4(),
            email: profile.email.clone(),
            password_hash: None,
            oauth_provider: Some(profile.provider.clone()),
            oauth_id: Some(profile.provider_account_id.clone()),
            login_type,
            name: profile.name.clone(),
            avatar_url: profile.avatar_url.clone(),
            scopes: DEFAULT_SCOPES.into(),
        }
    }
}

/// Profile returned by an OAuth provider exchange. Never persisted as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInfo {
    pub provider: String,
    pub provider_account_id: String,
    pub name: String,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

impl ProfileInfo {
    /// Blank emails become `None`; present ones are trimmed and lower-cased.
    pub fn normalized(mut self) -> Self {
        self.email = self
            .email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());
        self
    }
}
