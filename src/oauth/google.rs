use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{read_json, AccessTokenResponse, OAuthError, ProfileProvider, ProviderDescriptor};
use crate::{auth::model::ProfileInfo, config::ProviderConfig};

const NAME: &str = "google";
const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const ACCESS_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USER_INFO_URL: &str = "https://www.googleapis.com/oauth2/v2/userinfo";

#[derive(Debug, Deserialize)]
struct GoogleUser {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    verified_email: bool,
}

impl From<GoogleUser> for ProfileInfo {
    fn from(user: GoogleUser) -> Self {
        ProfileInfo {
            provider: NAME.into(),
            provider_account_id: user.id,
            name: user.name.unwrap_or_default(),
            avatar_url: user.picture,
            email: user.email.filter(|_| user.verified_email),
        }
    }
}

pub struct GoogleProvider {
    cfg: ProviderConfig,
    http: Client,
}

impl GoogleProvider {
    pub fn new(cfg: ProviderConfig, http: Client) -> Self {
        Self { cfg, http }
    }
}

#[async_trait]
impl ProfileProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            provider: NAME.into(),
            client_id: self.cfg.client_id.clone(),
            base_url: AUTHORIZE_URL.into(),
            redirect_uri: self.cfg.redirect_uri.clone(),
            access_type: "offline".into(),
            scope: "profile email".into(),
        }
    }

    #[instrument(skip_all, fields(provider = NAME))]
    async fn fetch_profile(&self, code: &str) -> Result<ProfileInfo, OAuthError> {
        let body = serde_json::json!({
            "code": code,
            "client_id": self.cfg.client_id,
            "client_secret": self.cfg.client_secret,
            "grant_type": "authorization_code",
            "redirect_uri": self.cfg.redirect_uri,
        });
        let resp = self
            .http
            .post(ACCESS_TOKEN_URL)
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
            .send()
            .await
            .map_err(|source| OAuthError::Http {
                stage: "user info",
                source,
            })?;
        let user: GoogleUser = read_json("user info", resp).await?;
        Ok(user.into())
    }
}
