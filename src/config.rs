use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

/// Secrets and lifetimes for the two token kinds.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub access_secret: String,
    pub issuer: String,
    pub access_ttl_secs: u64,
    pub reset_secret: String,
    pub reset_ttl_secs: u64,
}

impl TokenConfig {
    pub fn access_ttl(&self) -> Duration {
        Duration::from_secs(self.access_ttl_secs)
    }

    pub fn reset_ttl(&self) -> Duration {
        Duration::from_secs(self.reset_ttl_secs)
    }
}

/// Base urls used to build password-reset links and redirects.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub backend_base_url: String,
    pub backend_reset_path: String,
    pub frontend_base_url: String,
    pub frontend_reset_path: String,
    pub frontend_dashboard_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    pub github: Option<ProviderConfig>,
    pub google: Option<ProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Unset means the in-memory store (local development only).
    pub database_url: Option<String>,
    pub tokens: TokenConfig,
    pub links: LinkConfig,
    pub oauth: OAuthConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let tokens = TokenConfig {
            access_secret: std::env::var("JWT_SECRET_KEY").context("JWT_SECRET_KEY not set")?,
            issuer: var_or("JWT_TOKEN_ISSUER", "auth-service"),
            access_ttl_secs: parse_or("JWT_TOKEN_EXPIRY", 3600),
            reset_secret: std::env::var("FORGOT_PASS_SECRET_KEY")
                .context("FORGOT_PASS_SECRET_KEY not set")?,
            reset_ttl_secs: parse_or("FORGOT_PASS_EXPIRY", 600),
        };
        tokens.check()?;

        let links = LinkConfig {
            backend_base_url: var_or("BACKEND_BASE_DOMAIN", "http://localhost:8080/"),
            backend_reset_path: var_or(
                "BACKEND_RESET_PASSWORD_URL",
                "api/v1/auth/verify-reset-password",
            ),
            frontend_base_url: var_or("FRONTEND_BASE_DOMAIN", "http://127.0.0.1:3000/"),
            frontend_reset_path: var_or("FRONTEND_RESET_PASSWORD_PAGE_URL", "reset-password"),
            frontend_dashboard_path: var_or("FRONTEND_DASHBOARD_PAGE_URL", "dashboard"),
        };

        let oauth = OAuthConfig {
            github: provider_from_env("GITHUB"),
            google: provider_from_env("GOOGLE"),
        };

        Ok(Self {
            database_url,
            tokens,
            links,
            oauth,
        })
    }
}

/// Upper bound for token lifetimes; keeps `iat + ttl` well inside `i64`.
pub const MAX_TTL_SECS: u64 = i32::MAX as u64;

impl TokenConfig {
    fn check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.access_secret.is_empty(), "JWT_SECRET_KEY is empty");
        anyhow::ensure!(!self.reset_secret.is_empty(), "FORGOT_PASS_SECRET_KEY is empty");
        anyhow::ensure!(
            self.access_secret != self.reset_secret,
            "JWT_SECRET_KEY and FORGOT_PASS_SECRET_KEY must differ"
        );
        anyhow::ensure!(
            (1..=MAX_TTL_SECS).contains(&self.access_ttl_secs),
            "JWT_TOKEN_EXPIRY must be between 1 and {MAX_TTL_SECS} seconds"
        );
        anyhow::ensure!(
            (1..=MAX_TTL_SECS).contains(&self.reset_ttl_secs),
            "FORGOT_PASS_EXPIRY must be between 1 and {MAX_TTL_SECS} seconds"
        );
        Ok(())
    }
}

fn var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_or(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn provider_from_env(name: &str) -> Option<ProviderConfig> {
    let client_id = std::env::var(format!("OAUTH_{name}_CLIENT_ID"))
        .ok()
        .filter(|v| !v.is_empty())?;
    Some(ProviderConfig {
        client_id,
        client_secret: std::env::var(format!("OAUTH_{name}_CLIENT_SECRET")).unwrap_or_default(),
        redirect_uri: std::env::var(format!("OAUTH_{name}_CLIENT_REDIRECT_URI")).unwrap_or_default(),
    })
}
