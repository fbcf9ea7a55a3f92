//! Third-party sign-in.
//!
//! A [`ProfileProvider`] turns an authorization code into a [`ProfileInfo`];
//! the resolver decides what account that profile maps to. Providers are
//! enabled by configuration and looked up by name in a [`ProviderRegistry`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{extract::FromRef, Router};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{auth::model::ProfileInfo, config::OAuthConfig, error::AuthError, state::AppState};

mod github;
mod google;
pub mod handlers;

pub use github::GitHubProvider;
pub use google::GoogleProvider;

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("Unsupported OAuth provider: {0}")]
    UnknownProvider(String),

    #[error("{stage} request failed")]
    Http {
        stage: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{stage} returned {status}")]
    Status {
        stage: &'static str,
        status: StatusCode,
    },

    #[error("provider response had no access token")]
    MissingAccessToken,
}

impl From<OAuthError> for AuthError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::UnknownProvider(_) => AuthError::bad_request(err.to_string()),
            other => AuthError::internal(other),
        }
    }
}

/// What the frontend needs to start an authorization redirect. Never carries
/// the client secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderDescriptor {
    pub provider: String,
    pub client_id: String,
    pub base_url: String,
    pub redirect_uri: String,
    pub access_type: String,
    pub scope: String,
}

#[async_trait]
pub trait ProfileProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn descriptor(&self) -> ProviderDescriptor;

    /// Exchanges `code` for an access token and reads the user's profile.
    async fn fetch_profile(&self, code: &str) -> Result<ProfileInfo, OAuthError>;
}

/// Token endpoint response, shared by both providers.
#[derive(Debug, Deserialize)]
pub(crate) struct AccessTokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

impl AccessTokenResponse {
    /// Value for the `Authorization` header of the profile request.
    pub(crate) fn authorization(self) -> Result<String, OAuthError> {
        let token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(OAuthError::MissingAccessToken)?;
        let scheme = match self.token_type.as_deref() {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => "Bearer".to_owned(),
        };
        Ok(format!("{scheme} {token}"))
    }
}

pub(crate) async fn read_json<T: for<'de> Deserialize<'de>>(
    stage: &'static str,
    resp: reqwest::Response,
) -> Result<T, OAuthError> {
    let status = resp.status();
    if !status.is_success() {
        warn!(%status, stage, "oauth provider rejected request");
        return Err(OAuthError::Status { stage, status });
    }
    resp.json::<T>()
        .await
        .map_err(|source| OAuthError::Http { stage, source })
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn ProfileProvider>>,
}

impl FromRef<AppState> for Arc<ProviderRegistry> {
    fn from_ref(state: &AppState) -> Self {
        state.providers.clone()
    }
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn ProfileProvider>>) -> Self {
        Self { providers }
    }

    /// Enables every provider that has a client id configured.
    pub fn from_config(cfg: &OAuthConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut providers: Vec<Arc<dyn ProfileProvider>> = Vec::new();
        if let Some(github) = &cfg.github {
            providers.push(Arc::new(GitHubProvider::new(github.clone(), http.clone())));
        }
        if let Some(google) = &cfg.google {
            providers.push(Arc::new(GoogleProvider::new(google.clone(), http)));
        }
        Ok(Self::new(providers))
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ProfileProvider>, OAuthError> {
        let name = name.trim().to_lowercase();
        self.providers
            .iter()
            .find(|p| p.name() == name)
            .cloned()
            .ok_or(OAuthError::UnknownProvider(name))
    }

    /// All descriptors, or only those named in a comma-separated filter.
    pub fn descriptors(&self, filter: Option<&str>) -> Vec<ProviderDescriptor> {
        let wanted: Vec<String> = filter
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        self.providers
            .iter()
            .filter(|p| wanted.is_empty() || wanted.iter().any(|w| w == p.name()))
            .map(|p| p.descriptor())
            .collect()
    }
}

pub fn router() -> Router<AppState> {
    handlers::oauth_routes()
}
