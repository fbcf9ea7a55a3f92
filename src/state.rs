use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

use crate::{
    auth::{
        memory::MemoryAccountStore, repo::PgAccountStore, resolver::IdentityResolver,
        store::AccountStore, tokens::TokenService,
    },
    config::AppConfig,
    metrics::HttpMetrics,
    notify::{EmailTemplates, LogDispatcher, NotificationDispatcher, OutboxDispatcher},
    oauth::ProviderRegistry,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub tokens: Arc<TokenService>,
    pub resolver: Arc<IdentityResolver>,
    pub providers: Arc<ProviderRegistry>,
    pub metrics: Arc<HttpMetrics>,
    /// `None` when running on the in-memory store.
    pub db: Option<PgPool>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let (db, store, notifier): (
            Option<PgPool>,
            Arc<dyn AccountStore>,
            Arc<dyn NotificationDispatcher>,
        ) = match &config.database_url {
            Some(url) => {
                let db = PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await
                    .context("connect to DATABASE_URL")?;
                let templates = EmailTemplates::new(&config.links);
                (
                    Some(db.clone()),
                    Arc::new(PgAccountStore::new(db.clone())) as Arc<dyn AccountStore>,
                    Arc::new(OutboxDispatcher::new(db, templates)) as Arc<dyn NotificationDispatcher>,
                )
            }
            None => {
                warn!("DATABASE_URL not set; using in-memory store, data is lost on restart");
                (
                    None,
                    Arc::new(MemoryAccountStore::new()) as Arc<dyn AccountStore>,
                    Arc::new(LogDispatcher) as Arc<dyn NotificationDispatcher>,
                )
            }
        };

        let providers = Arc::new(ProviderRegistry::from_config(&config.oauth)?);
        info!(
            providers = ?providers.descriptors(None).iter().map(|d| d.provider.as_str()).collect::<Vec<_>>(),
            "oauth providers enabled"
        );

        Ok(Self::from_parts(config, store, notifier, providers, db))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn AccountStore>,
        notifier: Arc<dyn NotificationDispatcher>,
        providers: Arc<ProviderRegistry>,
        db: Option<PgPool>,
    ) -> Self {
        let tokens = Arc::new(TokenService::new(&config.tokens));
        let resolver = Arc::new(IdentityResolver::new(
            store,
            notifier,
            tokens.clone(),
            config.links.clone(),
        ));
        Self {
            config,
            tokens,
            resolver,
            providers,
            metrics: Arc::new(HttpMetrics::new()),
            db,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with(Arc::new(MemoryAccountStore::new()))
    }

    /// Test state over the given store, with stub GitHub and Google
    /// providers that accept the code `ok`.
    #[cfg(test)]
    pub fn fake_with(store: Arc<MemoryAccountStore>) -> Self {
        use crate::{
            auth::{resolver::tests::links, tokens::tests::test_config},
            config::OAuthConfig,
            notify::tests::RecordingDispatcher,
            oauth::tests::stub,
        };

        let config = Arc::new(AppConfig {
            database_url: None,
            tokens: test_config(),
            links: links(),
            oauth: OAuthConfig::default(),
        });
        let providers = Arc::new(ProviderRegistry::new(vec![
            stub("github", "gh-1", None),
            stub("google", "g-1", Some("octo@x.com")),
        ]));
        Self::from_parts(
            config,
            store,
            Arc::new(RecordingDispatcher::default()),
            providers,
            None,
        )
    }
}
