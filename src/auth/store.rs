use async_trait::async_trait;
use uuid::Uuid;

use crate::auth::model::{Account, NewAccount};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique constraint rejected the write; carries the constraint name.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("account not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub const EMAIL_UNIQUE: &str = "accounts_email_key";
pub const OAUTH_IDENTITY_UNIQUE: &str = "accounts_oauth_identity_key";

/// Durable account storage. Implementations must enforce uniqueness of
/// `email` and of `(oauth_provider, oauth_id)` at write time.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_oauth_id(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Account>, StoreError>;

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError>;

    async fn create(&self, account: NewAccount) -> Result<Account, StoreError>;

    /// Overwrites any previously stored reset token.
    async fn update_forgot_password_token(&self, id: Uuid, token: &str) -> Result<(), StoreError>;

    async fn clear_forgot_password_token(&self, id: Uuid) -> Result<(), StoreError>;

    /// Also stamps `password_changed_at`.
    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<(), StoreError>;

    async fn update_last_login_at(&self, id: Uuid) -> Result<(), StoreError>;
}
