use anyhow::Context;
use reqwest::Url;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{
        model::{Account, LoginType},
        password::MIN_PASSWORD_LEN,
        resolver::{dispatch_best_effort, hash_blocking, login_type_mismatch, IdentityResolver},
    },
    error::AuthError,
};

/// Outcome of a reset request. Unknown emails are acknowledged the same way
/// as known ones; `Sent` is only exposed for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetRequest {
    Sent,
    Ignored,
}

impl IdentityResolver {
    #[instrument(skip(self))]
    pub async fn request_password_reset(&self, email: &str) -> Result<ResetRequest, AuthError> {
        let account = match self.store.find_by_email(email).await? {
            Some(account) if !account.is_deleted => account,
            _ => {
                debug!("password reset for unknown email");
                return Ok(ResetRequest::Ignored);
            }
        };
        if account.login_type != LoginType::EmailPassword {
            return Err(login_type_mismatch(&account));
        }

        let token = self.tokens.issue_password_reset_token(&account)?;
        self.store
            .update_forgot_password_token(account.id, &token)
            .await?;

        let url = self.reset_link(email, &token)?;
        let notifier = self.notifier.clone();
        let (to, name) = (email.to_owned(), account.name.clone());
        dispatch_best_effort("password reset email", async move {
            notifier.send_password_reset_link(&to, &name, &url).await
        });

        info!(account_id = %account.id, "password reset requested");
        Ok(ResetRequest::Sent)
    }

    /// Checks a reset link and returns where the browser should go next.
    #[instrument(skip(self, token))]
    pub async fn verify_reset_link(&self, email: &str, token: &str) -> Result<String, AuthError> {
        self.accept_reset_token(email, token).await?;

        let mut url = parse_link(
            &self.links.frontend_base_url,
            &self.links.frontend_reset_path,
        )?;
        url.query_pairs_mut()
            .append_pair("token", token)
            .append_pair("email", email);
        Ok(url.into())
    }

    #[instrument(skip_all, fields(email = %email))]
    pub async fn reset_password(
        &self,
        email: &str,
        token: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError> {
        if password.trim() != confirm_password.trim() {
            return Err(AuthError::bad_request("Passwords do not match"));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::bad_request(format!(
                "Password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }

        let account = self.accept_reset_token(email, token).await?;
        if account.login_type != LoginType::EmailPassword {
            return Err(login_type_mismatch(&account));
        }

        // The token is spent before the hash changes; a failed update leaves
        // the old password in place and the link unusable.
        self.store.clear_forgot_password_token(account.id).await?;
        let hash = hash_blocking(password).await?;
        self.store.update_password_hash(account.id, &hash).await?;

        let notifier = self.notifier.clone();
        let to = email.to_owned();
        dispatch_best_effort("password changed email", async move {
            notifier.send_password_changed(&to).await
        });

        info!(account_id = %account.id, "password reset");
        Ok(())
    }

    /// Structure first, then the stored value. A token that no longer matches
    /// what is stored has been superseded or consumed.
    async fn accept_reset_token(&self, email: &str, token: &str) -> Result<Account, AuthError> {
        self.tokens.validate_reset_token_structure(token)?;

        let account = match self.store.find_by_email(email).await? {
            Some(account) if !account.is_deleted => account,
            _ => {
                warn!("reset token presented for unknown email");
                return Err(AuthError::TokenInvalid);
            }
        };
        self.tokens
            .validate_reset_token(token, &account.forgot_password_token)?;
        Ok(account)
    }

    fn reset_link(&self, email: &str, token: &str) -> Result<String, AuthError> {
        let mut url = parse_link(
            &self.links.backend_base_url,
            &self.links.backend_reset_path,
        )?;
        url.query_pairs_mut()
            .append_pair("email", email)
            .append_pair("token", token);
        Ok(url.into())
    }
}

fn parse_link(base: &str, path: &str) -> Result<Url, AuthError> {
    Url::parse(&format!("{base}{path}"))
        .with_context(|| format!("invalid link base {base}{path}"))
        .map_err(AuthError::internal)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use time::OffsetDateTime;
    use uuid::Uuid;

    use super::*;
    use crate::{
        auth::{
            memory::MemoryAccountStore,
            model::{NewAccount, ProfileInfo},
            password::{hash_password, verify_password},
            resolver::tests::{links, resolver_with, settle, setup},
            store::{AccountStore, StoreError},
            tokens::{
                tests::{account, test_config, FixedClock},
                TokenService,
            },
        },
        notify::tests::{RecordingDispatcher, Sent},
    };

    async fn seed(store: &impl AccountStore) -> Account {
        let hash = hash_password("old-password").unwrap();
        store
            .create(NewAccount::email_password("a@x.com", hash, Some("Ada".into())))
            .await
            .unwrap()
    }

    fn token_from(url: &str) -> String {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    async fn requested_link(
        resolver: &IdentityResolver,
        notifier: &crate::notify::tests::RecordingDispatcher,
    ) -> String {
        assert_eq!(
            resolver.request_password_reset("a@x.com").await.unwrap(),
            ResetRequest::Sent
        );
        settle().await;
        notifier
            .sent()
            .into_iter()
            .rev()
            .find_map(|s| match s {
                Sent::ResetLink(_, url) => Some(url),
                _ => None,
            })
            .expect("reset link dispatched")
    }

    #[tokio::test]
    async fn request_stores_token_and_sends_backend_link() {
        let (resolver, store, notifier) = setup();
        let acc = seed(&*store).await;

        let url = requested_link(&resolver, &notifier).await;
        assert!(url.starts_with("http://localhost:8080/api/v1/auth/verify-reset-password?"));
        assert!(url.contains("email=a%40x.com"));

        let stored = store.find_by_id(acc.id).await.unwrap().unwrap();
        assert_eq!(stored.forgot_password_token, token_from(&url));
    }

    #[tokio::test]
    async fn unknown_email_is_acknowledged_silently() {
        let (resolver, _, notifier) = setup();
        let outcome = resolver.request_password_reset("ghost@x.com").await.unwrap();
        assert_eq!(outcome, ResetRequest::Ignored);
        settle().await;
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn deleted_account_is_treated_as_unknown() {
        let (resolver, store, _) = setup();
        let mut acc = account(Some("gone@x.com"));
        acc.is_deleted = true;
        store.insert_raw(acc).await;
        let outcome = resolver.request_password_reset("gone@x.com").await.unwrap();
        assert_eq!(outcome, ResetRequest::Ignored);
    }

    #[tokio::test]
    async fn oauth_account_cannot_request_reset() {
        let (resolver, _, _) = setup();
        resolver
            .resolve_oauth_identity(&ProfileInfo {
                provider: "google".into(),
                provider_account_id: "g".into(),
                name: "G".into(),
                avatar_url: None,
                email: Some("a@x.com".into()),
            })
            .await
            .unwrap();
        let err = resolver.request_password_reset("a@x.com").await.unwrap_err();
        assert!(matches!(err, AuthError::AccountLoginTypeMismatch { .. }));
    }

    #[tokio::test]
    async fn verify_redirects_to_frontend_page() {
        let (resolver, store, notifier) = setup();
        seed(&*store).await;
        let token = token_from(&requested_link(&resolver, &notifier).await);

        let redirect = resolver.verify_reset_link("a@x.com", &token).await.unwrap();
        assert!(redirect.starts_with("http://127.0.0.1:3000/reset-password?token="));
        assert_eq!(token_from(&redirect), token);
    }

    #[tokio::test]
    async fn newer_request_supersedes_older_token() {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let clock = FixedClock::at(now);
        let store = Arc::new(MemoryAccountStore::new());
        let notifier = Arc::new(RecordingDispatcher::default());
        let resolver = IdentityResolver::new(
            store.clone(),
            notifier.clone(),
            Arc::new(TokenService::with_clock(&test_config(), clock.clone())),
            links(),
        );
        seed(&*store).await;
        let first = token_from(&requested_link(&resolver, &notifier).await);

        clock.set(now + 1);
        let second = token_from(&requested_link(&resolver, &notifier).await);
        assert_ne!(first, second);

        let err = resolver.verify_reset_link("a@x.com", &first).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
        resolver.verify_reset_link("a@x.com", &second).await.unwrap();
    }

    #[tokio::test]
    async fn reset_keeps_surrounding_whitespace_in_password() {
        let (resolver, store, notifier) = setup();
        let acc = seed(&*store).await;
        let token = token_from(&requested_link(&resolver, &notifier).await);

        resolver
            .reset_password("a@x.com", &token, "  my new secret  ", "my new secret ")
            .await
            .unwrap();

        let stored = store.find_by_id(acc.id).await.unwrap().unwrap();
        assert!(stored.forgot_password_token.is_empty());
        assert!(stored.password_changed_at.is_some());
        let hash = stored.password_hash.as_deref().unwrap();
        assert!(verify_password("  my new secret  ", hash).unwrap());
        assert!(!verify_password("my new secret", hash).unwrap());

        resolver
            .resolve_password_identity("a@x.com", "  my new secret  ")
            .await
            .unwrap();

        settle().await;
        assert!(notifier
            .sent()
            .contains(&Sent::PasswordChanged("a@x.com".into())));

        let err = resolver
            .reset_password("a@x.com", &token, "another-pass", "another-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    /// Memory store whose reset-related writes can be made to fail.
    struct FlakyStore {
        inner: Arc<MemoryAccountStore>,
        fail_clear: bool,
        fail_hash: bool,
    }

    #[async_trait]
    impl AccountStore for FlakyStore {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
            self.inner.find_by_id(id).await
        }
        async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
            self.inner.find_by_email(email).await
        }
        async fn find_by_oauth_id(
            &self,
            provider: &str,
            id: &str,
        ) -> Result<Option<Account>, StoreError> {
            self.inner.find_by_oauth_id(provider, id).await
        }
        async fn exists_by_email(&self, email: &str) -> Result<bool, StoreError> {
            self.inner.exists_by_email(email).await
        }
        async fn create(&self, account: NewAccount) -> Result<Account, StoreError> {
            self.inner.create(account).await
        }
        async fn update_forgot_password_token(&self, id: Uuid, t: &str) -> Result<(), StoreError> {
            self.inner.update_forgot_password_token(id, t).await
        }
        async fn clear_forgot_password_token(&self, id: Uuid) -> Result<(), StoreError> {
            if self.fail_clear {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.clear_forgot_password_token(id).await
        }
        async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<(), StoreError> {
            if self.fail_hash {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.update_password_hash(id, hash).await
        }
        async fn update_last_login_at(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.update_last_login_at(id).await
        }
    }

    async fn flaky(
        fail_clear: bool,
        fail_hash: bool,
    ) -> (IdentityResolver, Arc<MemoryAccountStore>, Account, String) {
        let inner = Arc::new(MemoryAccountStore::new());
        let notifier = Arc::new(RecordingDispatcher::default());
        let resolver = resolver_with(
            Arc::new(FlakyStore {
                inner: inner.clone(),
                fail_clear,
                fail_hash,
            }),
            notifier.clone(),
        );
        let acc = seed(&*inner).await;
        let token = token_from(&requested_link(&resolver, &notifier).await);
        (resolver, inner, acc, token)
    }

    #[tokio::test]
    async fn failed_token_clear_leaves_password_untouched() {
        let (resolver, store, acc, token) = flaky(true, false).await;

        let err = resolver
            .reset_password("a@x.com", &token, "new-password", "new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));

        let stored = store.find_by_id(acc.id).await.unwrap().unwrap();
        assert!(stored.password_changed_at.is_none());
        let hash = stored.password_hash.as_deref().unwrap();
        assert!(verify_password("old-password", hash).unwrap());
        assert!(!verify_password("new-password", hash).unwrap());
    }

    #[tokio::test]
    async fn failed_hash_update_still_spends_the_token() {
        let (resolver, store, acc, token) = flaky(false, true).await;

        let err = resolver
            .reset_password("a@x.com", &token, "new-password", "new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));

        let stored = store.find_by_id(acc.id).await.unwrap().unwrap();
        assert!(stored.forgot_password_token.is_empty());
        assert!(verify_password("old-password", stored.password_hash.as_deref().unwrap()).unwrap());

        let err = resolver
            .reset_password("a@x.com", &token, "new-password", "new-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }

    #[tokio::test]
    async fn reset_rejects_mismatched_or_short_passwords() {
        let (resolver, store, notifier) = setup();
        seed(&*store).await;
        let token = token_from(&requested_link(&resolver, &notifier).await);

        let err = resolver
            .reset_password("a@x.com", &token, "new-password", "other-password")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));

        let err = resolver
            .reset_password("a@x.com", &token, "short", "short")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::BadRequest(_)));
    }

    #[tokio::test]
    async fn access_token_is_not_a_reset_token() {
        let (resolver, store, _) = setup();
        let acc = seed(&*store).await;
        let access = resolver.tokens.issue_access_token(&acc).unwrap();
        store
            .update_forgot_password_token(acc.id, &access)
            .await
            .unwrap();
        let err = resolver.verify_reset_link("a@x.com", &access).await.unwrap_err();
        assert!(matches!(err, AuthError::TokenInvalid));
    }
}
