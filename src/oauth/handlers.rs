use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{ProviderDescriptor, ProviderRegistry};
use crate::{
    auth::{model::LoginType, resolver::IdentityResolver},
    error::AuthError,
    state::AppState,
};

pub fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/oauth/providers", get(providers))
        .route("/oauth/callback", post(callback))
}

#[derive(Debug, Deserialize)]
pub struct ProvidersQuery {
    pub provider: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProvidersResponse {
    pub clients: Vec<ProviderDescriptor>,
    pub success: bool,
    pub status_code: u16,
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub provider: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub success: bool,
    pub user_id: Uuid,
    pub auth_token: String,
    pub email: Option<String>,
    pub name: String,
    pub is_new_user: bool,
    pub message: &'static str,
    pub login_type: LoginType,
}

#[instrument(skip(registry))]
pub async fn providers(
    State(registry): State<Arc<ProviderRegistry>>,
    Query(query): Query<ProvidersQuery>,
) -> Json<ProvidersResponse> {
    let clients = registry.descriptors(query.provider.as_deref());
    Json(ProvidersResponse {
        clients,
        success: true,
        status_code: StatusCode::OK.as_u16(),
    })
}

#[instrument(skip(registry, resolver, payload), fields(provider = %payload.provider))]
pub async fn callback(
    State(registry): State<Arc<ProviderRegistry>>,
    State(resolver): State<Arc<IdentityResolver>>,
    Json(payload): Json<CallbackRequest>,
) -> Result<Json<CallbackResponse>, AuthError> {
    if payload.code.trim().is_empty() {
        return Err(AuthError::bad_request("Missing authorization code"));
    }
    let provider = registry.get(&payload.provider)?;
    let profile = provider.fetch_profile(payload.code.trim()).await?;

    let outcome = resolver.login_with_oauth(&profile).await?;
    info!(account_id = %outcome.account.id, "oauth callback complete");

    let message = if outcome.is_new_account {
        "Welcome onboard"
    } else {
        "Welcome back"
    };
    Ok(Json(CallbackResponse {
        success: true,
        user_id: outcome.account.id,
        auth_token: outcome.access_token,
        email: outcome.account.email,
        name: outcome.account.name,
        is_new_user: outcome.is_new_account,
        message,
        login_type: outcome.account.login_type,
    }))
}
