use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{read_json, AccessTokenResponse, OAuthError, ProfileProvider, ProviderDescriptor};
use crate::{auth::model::ProfileInfo, config::ProviderConfig};

const NAME: &str = "github";
const AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_INFO_URL: &str = "https://api.github.com/user";

#[derive(Debug, Deserialize)]
struct GitHubUser {
    id: i64,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
    /// Only present when the user made their email public.
    #[serde(default)]
    email: Option<String>,
}

impl From<GitHubUser> for ProfileInfo {
    fn from(user: GitHubUser) -> Self {
        ProfileInfo {
            provider: NAME.into(),
            provider_account_id: user.id.to_string(),
            name: user.name.or(user.login).unwrap_or_default(),
            avatar_url: user.avatar_url,
            email: user.email,
        }
    }
}

pub struct GitHubProvider {
    cfg: ProviderConfig,
    http: Client,
}

impl GitHubProvider {
    pub fn new(cfg: ProviderConfig, http: Client) -> Self {
        Self { cfg, http }
    }
}

#[async_trait]
impl ProfileProvider for GitHubProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            provider: NAME.into(),
            client_id: self.cfg.client_id.clone(),
            base_url: AUTHORIZE_URL.into(),
            redirect_uri: self.cfg.redirect_uri.clone(),
            access_type: "online".into(),
            scope: "read:user user:email".into(),
        }
    }

    #[instrument(skip_all, fields(provider = NAME))]
    async fn fetch_profile(&self, code: &str) -> Result<ProfileInfo, OAuthError> {
        let body = serde_json::json!({
            "code": code,
            "client_id": self.cfg.client_id,
            "client_secret": self.cfg.client_secret,
            "redirect_uri": self.cfg.redirect_uri,
        });
        let resp = self
            .http
            .post(ACCESS_TOKEN_URL)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|source| OAuthError::Http {
                stage: "access token",
                source,
            })?;
        let authorization = read_json::<AccessTokenResponse>("access token", resp)
            .await?
            .authorization()?;
        debug!("access token fetched");

        let resp = self
            .http
            .get(USER_INFO_URL)
            .header(header::AUTHORIZATION, authorization)
            .header(header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|source| OAuthError::Http {
                stage: "user info",
                source,
            })?;
        let user: GitHubUser = read_json("user info", resp).await?;
        Ok(user.into())
    }
}
