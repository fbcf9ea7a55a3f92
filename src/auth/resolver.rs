use std::{future::Future, sync::Arc};

use axum::extract::FromRef;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        model::{Account, LoginType, NewAccount, ProfileInfo},
        password::{equalize_timing, hash_password, verify_password},
        store::{AccountStore, StoreError, OAUTH_IDENTITY_UNIQUE},
        tokens::TokenService,
    },
    config::LinkConfig,
    error::{AuthError, ConflictKind},
    notify::NotificationDispatcher,
    state::AppState,
};

/// Decides which account a password attempt or an OAuth profile refers to,
/// creating accounts where the rules allow it.
pub struct IdentityResolver {
    pub(super) store: Arc<dyn AccountStore>,
    pub(super) notifier: Arc<dyn NotificationDispatcher>,
    pub(super) tokens: Arc<TokenService>,
    pub(super) links: LinkConfig,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub account: Account,
    pub access_token: String,
}

#[derive(Debug)]
pub struct OAuthOutcome {
    pub account: Account,
    pub access_token: String,
    pub is_new_account: bool,
}

impl FromRef<AppState> for Arc<IdentityResolver> {
    fn from_ref(state: &AppState) -> Self {
        state.resolver.clone()
    }
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        tokens: Arc<TokenService>,
        links: LinkConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            tokens,
            links,
        }
    }

    /// Unknown and soft-deleted emails fail exactly like a wrong password.
    #[instrument(skip(self, raw_password))]
    pub async fn resolve_password_identity(
        &self,
        email: &str,
        raw_password: &str,
    ) -> Result<Account, AuthError> {
        let account = match self.store.find_by_email(email).await? {
            Some(account) if !account.is_deleted => account,
            _ => {
                let raw = raw_password.to_owned();
                tokio::task::spawn_blocking(move || equalize_timing(&raw))
                    .await
                    .map_err(AuthError::internal)?;
                debug!("login for unknown email");
                return Err(AuthError::InvalidCredentials);
            }
        };

        if account.login_type != LoginType::EmailPassword {
            debug!(account_id = %account.id, login_type = %account.login_type, "password login refused");
            return Err(login_type_mismatch(&account));
        }

        let hash = account.password_hash.clone().ok_or_else(|| {
            AuthError::internal(anyhow::anyhow!(
                "email_pass account {} has no password hash",
                account.id
            ))
        })?;
        if !verify_blocking(raw_password, hash).await? {
            warn!(account_id = %account.id, "login invalid password");
            return Err(AuthError::InvalidCredentials);
        }
        Ok(account)
    }

    /// Returns the account and whether it was created by this call.
    #[instrument(skip(self, profile), fields(provider = %profile.provider))]
    pub async fn resolve_oauth_identity(
        &self,
        profile: &ProfileInfo,
    ) -> Result<(Account, bool), AuthError> {
        let profile = profile.clone().normalized();
        if profile.provider.is_empty() || profile.provider_account_id.is_empty() {
            return Err(AuthError::bad_request("Incomplete OAuth profile"));
        }

        if let Some(existing) = self
            .store
            .find_by_oauth_id(&profile.provider, &profile.provider_account_id)
            .await?
        {
            if existing.is_deleted {
                warn!(account_id = %existing.id, "oauth identity belongs to a deleted account");
                return Err(AuthError::AccountConflict(ConflictKind::OAuthIdentity));
            }
            debug!(account_id = %existing.id, "oauth identity already registered");
            return Ok((existing, false));
        }

        if let Some(email) = profile.email.as_deref() {
            if self.store.exists_by_email(email).await? {
                warn!(%email, "oauth email already owned by another account");
                return Err(AuthError::AccountConflict(ConflictKind::Email));
            }
        }

        let account = match self.store.create(NewAccount::from_profile(&profile)).await {
            Ok(account) => account,
            Err(StoreError::UniqueViolation(constraint)) => {
                warn!(%constraint, "concurrent oauth registration lost the race");
                return Err(AuthError::AccountConflict(conflict_kind(&constraint)));
            }
            Err(e) => return Err(e.into()),
        };

        info!(account_id = %account.id, login_type = %account.login_type, "oauth account registered");
        self.on_account_created(&account);
        Ok((account, true))
    }

    #[instrument(skip(self, raw_password, name))]
    pub async fn register_password_account(
        &self,
        email: &str,
        raw_password: &str,
        name: Option<String>,
    ) -> Result<Account, AuthError> {
        if self.store.exists_by_email(email).await? {
            warn!(%email, "email already registered");
            return Err(AuthError::AccountConflict(ConflictKind::Email));
        }

        let hash = hash_blocking(raw_password).await?;
        let account = match self
            .store
            .create(NewAccount::email_password(email, hash, name))
            .await
        {
            Ok(account) => account,
            Err(StoreError::UniqueViolation(constraint)) => {
                warn!(%constraint, "concurrent signup lost the race");
                return Err(AuthError::AccountConflict(ConflictKind::Email));
            }
            Err(e) => return Err(e.into()),
        };

        info!(account_id = %account.id, %email, "user registered");
        self.on_account_created(&account);
        Ok(account)
    }

    pub async fn login_with_password(
        &self,
        email: &str,
        raw_password: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let account = self.resolve_password_identity(email, raw_password).await?;
        let access_token = self.tokens.issue_access_token(&account)?;
        self.touch_last_login(account.id).await;
        info!(account_id = %account.id, "user logged in");
        Ok(LoginOutcome {
            account,
            access_token,
        })
    }

    pub async fn login_with_oauth(&self, profile: &ProfileInfo) -> Result<OAuthOutcome, AuthError> {
        let (account, is_new_account) = self.resolve_oauth_identity(profile).await?;
        let access_token = self.tokens.issue_access_token(&account)?;
        self.touch_last_login(account.id).await;
        info!(account_id = %account.id, is_new_account, "oauth login");
        Ok(OAuthOutcome {
            account,
            access_token,
            is_new_account,
        })
    }

    /// Live (not soft-deleted) account by id.
    pub async fn account(&self, id: Uuid) -> Result<Account, AuthError> {
        match self.store.find_by_id(id).await? {
            Some(account) if !account.is_deleted => Ok(account),
            _ => Err(AuthError::Unauthenticated("Account not found")),
        }
    }

    async fn touch_last_login(&self, id: Uuid) {
        if let Err(e) = self.store.update_last_login_at(id).await {
            warn!(error = %e, account_id = %id, "failed to record last login");
        }
    }

    fn on_account_created(&self, account: &Account) {
        if let Some(email) = account.email.clone() {
            let notifier = self.notifier.clone();
            let name = account.name.clone();
            dispatch_best_effort("welcome email", async move {
                notifier.send_welcome(&email, &name).await
            });
        }
        let notifier = self.notifier.clone();
        let id = account.id;
        dispatch_best_effort("user registered event", async move {
            notifier.publish_registered(id).await
        });
    }
}

pub(super) fn login_type_mismatch(account: &Account) -> AuthError {
    AuthError::AccountLoginTypeMismatch {
        login_type: account.login_type,
        provider: account.oauth_provider.clone(),
    }
}

fn conflict_kind(constraint: &str) -> ConflictKind {
    if constraint == OAUTH_IDENTITY_UNIQUE {
        ConflictKind::OAuthIdentity
    } else {
        ConflictKind::Email
    }
}

/// Fire and forget: failures are logged, never retried, never surfaced.
pub(super) fn dispatch_best_effort<F>(what: &'static str, fut: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!(error = %e, notification = what, "notification dispatch failed");
        }
    });
}

pub(super) async fn hash_blocking(raw_password: &str) -> Result<String, AuthError> {
    let raw = raw_password.to_owned();
    tokio::task::spawn_blocking(move || hash_password(&raw))
        .await
        .map_err(AuthError::internal)?
        .map_err(AuthError::internal)
}

async fn verify_blocking(raw_password: &str, hash: String) -> Result<bool, AuthError> {
    let raw = raw_password.to_owned();
    tokio::task::spawn_blocking(move || verify_password(&raw, &hash))
        .await
        .map_err(AuthError::internal)?
        .map_err(AuthError::internal)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        auth::{
            memory::MemoryAccountStore,
            tokens::tests::{account, test_config},
        },
        notify::tests::{RecordingDispatcher, Sent},
    };
    use async_trait::async_trait;

    pub(crate) fn links() -> LinkConfig {
        LinkConfig {
            backend_base_url: "http://localhost:8080/".into(),
            backend_reset_path: "api/v1/auth/verify-reset-password".into(),
            frontend_base_url: "http://127.0.0.1:3000/".into(),
            frontend_reset_path: "reset-password".into(),
            frontend_dashboard_path: "dashboard".into(),
        }
    }

    pub(crate) fn resolver_with(
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> IdentityResolver {
        IdentityResolver::new(
            store,
            notifier,
            Arc::new(TokenService::new(&test_config())),
            links(),
        )
    }

    pub(crate) fn setup() -> (IdentityResolver, Arc<MemoryAccountStore>, Arc<RecordingDispatcher>) {
        let store = Arc::new(MemoryAccountStore::new());
        let notifier = Arc::new(RecordingDispatcher::default());
        (resolver_with(store.clone(), notifier.clone()), store, notifier)
    }

    /// Lets spawned best-effort dispatches run to completion.
    pub(crate) async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn profile(provider: &str, id: &str, email: Option<&str>) -> ProfileInfo {
        ProfileInfo {
            provider: provider.into(),
            provider_account_id: id.into(),
            name: "Octo Cat".into(),
            avatar_url: Some("https://avatars.example/1.png".into()),
            email: email.map(str::to_owned),
        }
    }

    async fn seed_password_account(store: &MemoryAccountStore, email: &str, pw: &str) -> Account {
        let hash = hash_password(pw).unwrap();
        store
            .create(NewAccount::email_password(email, hash, None))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn password_login_succeeds_with_right_password() {
        let (resolver, store, _) = setup();
        let seeded = seed_password_account(&store, "a@x.com", "pw1").await;
        let account = resolver
            .resolve_password_identity("a@x.com", "pw1")
            .await
            .expect("login");
        assert_eq!(account.id, seeded.id);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_email_are_indistinguishable() {
        let (resolver, store, _) = setup();
        seed_password_account(&store, "a@x.com", "pw1").await;

        let wrong = resolver
            .resolve_password_identity("a@x.com", "wrong")
            .await
            .unwrap_err();
        let unknown = resolver
            .resolve_password_identity("nope@x.com", "pw1")
            .await
            .unwrap_err();

        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
        assert_eq!(wrong.status(), unknown.status());
    }

    #[tokio::test]
    async fn password_login_on_oauth_account_is_type_mismatch() {
        let (resolver, _, _) = setup();
        let (oauth, _) = resolver
            .resolve_oauth_identity(&profile("github", "1", Some("o@x.com")))
            .await
            .unwrap();
        assert_eq!(oauth.login_type, LoginType::OAuthAndEmail);

        let err = resolver
            .resolve_password_identity("o@x.com", "anything")
            .await
            .unwrap_err();
        match err {
            AuthError::AccountLoginTypeMismatch {
                login_type,
                provider,
            } => {
                assert_eq!(login_type, LoginType::OAuthAndEmail);
                assert_eq!(provider.as_deref(), Some("github"));
            }
            other => panic!("expected login type mismatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn password_login_on_oauth_only_account_is_type_mismatch() {
        let (resolver, store, _) = setup();
        let mut acc = account(Some("legacy@x.com"));
        acc.login_type = LoginType::OAuthOnly;
        acc.oauth_provider = Some("google".into());
        acc.oauth_id = Some("42".into());
        store.insert_raw(acc).await;

        let err = resolver
            .resolve_password_identity("legacy@x.com", "pw")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::AccountLoginTypeMismatch {
                login_type: LoginType::OAuthOnly,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn deleted_account_cannot_log_in() {
        let (resolver, store, _) = setup();
        let mut acc = account(Some("gone@x.com"));
        acc.password_hash = Some(hash_password("pw1").unwrap());
        acc.is_deleted = true;
        store.insert_raw(acc).await;

        let err = resolver
            .resolve_password_identity("gone@x.com", "pw1")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn oauth_without_email_creates_oauth_only_account() {
        let (resolver, store, notifier) = setup();
        let (account, is_new) = resolver
            .resolve_oauth_identity(&profile("github", "123", None))
            .await
            .unwrap();

        assert!(is_new);
        assert_eq!(account.login_type, LoginType::OAuthOnly);
        assert!(account.email.is_none());
        assert!(account.password_hash.is_none());
        assert_eq!(account.oauth_provider.as_deref(), Some("github"));
        assert_eq!(account.oauth_id.as_deref(), Some("123"));
        assert_eq!(store.count().await, 1);

        settle().await;
        // no email, so no welcome; the registered event still goes out
        assert_eq!(notifier.sent(), vec![Sent::Registered(account.id)]);
    }

    #[tokio::test]
    async fn oauth_with_fresh_email_creates_oauth_and_email_account() {
        let (resolver, _, notifier) = setup();
        let (account, is_new) = resolver
            .resolve_oauth_identity(&profile("google", "g-1", Some("New@X.com")))
            .await
            .unwrap();
        assert!(is_new);
        assert_eq!(account.login_type, LoginType::OAuthAndEmail);
        assert_eq!(account.email.as_deref(), Some("new@x.com"));

        settle().await;
        let sent = notifier.sent();
        assert!(sent.contains(&Sent::Welcome("new@x.com".into())));
        assert!(sent.contains(&Sent::Registered(account.id)));
    }

    #[tokio::test]
    async fn returning_oauth_user_is_not_new() {
        let (resolver, store, _) = setup();
        let p = profile("github", "123", Some("a@x.com"));
        let (first, _) = resolver.resolve_oauth_identity(&p).await.unwrap();
        let (again, is_new) = resolver.resolve_oauth_identity(&p).await.unwrap();
        assert!(!is_new);
        assert_eq!(first.id, again.id);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn oauth_email_owned_by_password_account_is_conflict() {
        let (resolver, store, notifier) = setup();
        seed_password_account(&store, "a@x.com", "pw1").await;

        let err = resolver
            .resolve_oauth_identity(&profile("google", "999", Some("a@x.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountConflict(ConflictKind::Email)));
        assert_eq!(store.count().await, 1);

        settle().await;
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn same_provider_id_on_another_provider_is_a_different_identity() {
        let (resolver, store, _) = setup();
        resolver
            .resolve_oauth_identity(&profile("github", "7", None))
            .await
            .unwrap();
        let (_, is_new) = resolver
            .resolve_oauth_identity(&profile("google", "7", None))
            .await
            .unwrap();
        assert!(is_new);
        assert_eq!(store.count().await, 2);
    }

    /// Passes every existence check, then loses the insert race.
    struct RacingStore {
        inner: MemoryAccountStore,
        constraint: &'static str,
    }

    #[async_trait]
    impl AccountStore for RacingStore {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
            self.inner.find_by_id(id).await
        }
        async fn find_by_email(&self, _email: &str) -> Result<Option<Account>, StoreError> {
            Ok(None)
        }
        async fn find_by_oauth_id(
            &self,
            _provider: &str,
            _id: &str,
        ) -> Result<Option<Account>, StoreError> {
            Ok(None)
        }
        async fn exists_by_email(&self, _email: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn create(&self, _account: NewAccount) -> Result<Account, StoreError> {
            Err(StoreError::UniqueViolation(self.constraint.into()))
        }
        async fn update_forgot_password_token(&self, id: Uuid, t: &str) -> Result<(), StoreError> {
            self.inner.update_forgot_password_token(id, t).await
        }
        async fn clear_forgot_password_token(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.clear_forgot_password_token(id).await
        }
        async fn update_password_hash(&self, id: Uuid, hash: &str) -> Result<(), StoreError> {
            self.inner.update_password_hash(id, hash).await
        }
        async fn update_last_login_at(&self, id: Uuid) -> Result<(), StoreError> {
            self.inner.update_last_login_at(id).await
        }
    }

    #[tokio::test]
    async fn lost_insert_race_maps_to_conflict() {
        let notifier = Arc::new(RecordingDispatcher::default());
        let racing = |constraint| {
            resolver_with(
                Arc::new(RacingStore {
                    inner: MemoryAccountStore::new(),
                    constraint,
                }),
                notifier.clone(),
            )
        };

        let err = racing(OAUTH_IDENTITY_UNIQUE)
            .resolve_oauth_identity(&profile("github", "1", None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountConflict(ConflictKind::OAuthIdentity)));

        let err = racing(crate::auth::store::EMAIL_UNIQUE)
            .resolve_oauth_identity(&profile("github", "1", Some("a@x.com")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountConflict(ConflictKind::Email)));

        let err = racing(crate::auth::store::EMAIL_UNIQUE)
            .register_password_account("a@x.com", "longpassword", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountConflict(ConflictKind::Email)));

        settle().await;
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn failing_notifications_do_not_fail_resolution() {
        let store = Arc::new(MemoryAccountStore::new());
        let notifier = Arc::new(RecordingDispatcher::failing());
        let resolver = resolver_with(store.clone(), notifier.clone());

        let (account, is_new) = resolver
            .resolve_oauth_identity(&profile("github", "5", Some("f@x.com")))
            .await
            .expect("resolution succeeds despite dispatcher failure");
        assert!(is_new);

        settle().await;
        assert_eq!(notifier.sent().len(), 2);
        assert!(store.find_by_id(account.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn signup_rejects_taken_email() {
        let (resolver, store, _) = setup();
        seed_password_account(&store, "a@x.com", "pw1").await;
        let err = resolver
            .register_password_account("a@x.com", "another-password", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AccountConflict(ConflictKind::Email)));
    }

    #[tokio::test]
    async fn login_issues_token_and_records_last_login() {
        let (resolver, _, _) = setup();
        let created = resolver
            .register_password_account("a@x.com", "pw-long-enough", Some("Ada".into()))
            .await
            .unwrap();
        assert_eq!(created.login_type, LoginType::EmailPassword);

        let outcome = resolver
            .login_with_password("a@x.com", "pw-long-enough")
            .await
            .unwrap();
        let validated = resolver
            .tokens
            .validate_access_token(&outcome.access_token, created.id)
            .unwrap();
        assert_eq!(validated.account_id, created.id);

        let stored = resolver.account(created.id).await.unwrap();
        assert!(stored.last_login_at.is_some());
    }

    #[tokio::test]
    async fn oauth_login_reports_new_then_returning() {
        let (resolver, _, _) = setup();
        let p = profile("github", "77", None);
        let first = resolver.login_with_oauth(&p).await.unwrap();
        assert!(first.is_new_account);
        let second = resolver.login_with_oauth(&p).await.unwrap();
        assert!(!second.is_new_account);
        assert_eq!(first.account.id, second.account.id);
    }
}
