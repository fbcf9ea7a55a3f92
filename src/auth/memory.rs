use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::auth::{
    model::{Account, NewAccount},
    store::{AccountStore, StoreError, EMAIL_UNIQUE, OAUTH_IDENTITY_UNIQUE},
};

/// In-process store with the same uniqueness rules as the Postgres schema.
/// Used when no `DATABASE_URL` is configured, and by tests.
#[derive(Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<Vec<Account>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.accounts.lock().await.len()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Account),
    {
        let mut accounts = self.accounts.lock().await;
        let account = accounts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(StoreError::NotFound)?;
        f(account);
        account.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.lock().await;
        Ok(accounts.iter().find(|a| a.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .iter()
            .find(|a| a.email.as_deref() == Some(email))
            .cloned())
    }

    async fn find_by_oauth_id(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .iter()
            .find(|a| {
                a.oauth_provider.as_deref() == Some(provider)
                    && a.oauth_id.as_deref() == Some(provider_account_id)
            })
            .cloned())
    }

    async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.find_by_email(email).await?.is_some())
    }

    async fn create(&self, new: NewAccount) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.lock().await;

        if new.email.is_some() && accounts.iter().any(|a| a.email == new.email) {
            return Err(StoreError::UniqueViolation(EMAIL_UNIQUE.into()));
        }
        if new.oauth_id.is_some()
            && accounts
                .iter()
                .any(|a| a.oauth_provider == new.oauth_provider && a.oauth_id == new.oauth_id)
        {
            return Err(StoreError::UniqueViolation(OAUTH_IDENTITY_UNIQUE.into()));
        }

        let now = OffsetDateTime::now_utc();
        let account = Account {
            id: new.id,
            email: new.email,
            password_hash: new.password_hash,
            oauth_provider: new.oauth_provider,
            oauth_id: new.oauth_id,
            login_type: new.login_type,
            name: new.name,
            avatar_url: new.avatar_url,
            scopes: new.scopes,
            forgot_password_token: String::new(),
            last_login_at: None,
            password_changed_at: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        accounts.push(account.clone());
        Ok(account)
    }

    async fn update_forgot_password_token(&self, id: Uuid, token: &str) -> Result<(), StoreError> {
        self.update(id, |a| a.forgot_password_token = token.to_owned())
            .await
    }

    async fn clear_forgot_password_token(&self, id: Uuid) -> Result<(), StoreError> {
        self.update(id, |a| a.forgot_password_token.clear()).await
    }

    async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<(), StoreError> {
        self.update(id, |a| {
            a.password_hash = Some(hash.to_owned());
            a.password_changed_at = Some(OffsetDateTime::now_utc());
        })
        .await
    }

    async fn update_last_login_at(&self, id: Uuid) -> Result<(), StoreError> {
        self.update(id, |a| a.last_login_at = Some(OffsetDateTime::now_utc()))
            .await
    }
}

#[cfg(test)]
impl MemoryAccountStore {
    /// Inserts a fully-formed record, bypassing the create checks.
    pub(crate) async fn insert_raw(&self, account: Account) {
        self.accounts.lock().await.push(account);
    }
}
