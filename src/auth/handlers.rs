use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            normalize_email, ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse,
            PublicAccount, ResetPasswordRequest, SignupRequest, SignupResponse, TokenRequest,
            ValidateTokenResponse, VerifyResetQuery,
        },
        extractors::AuthAccount,
        password::MIN_PASSWORD_LEN,
        resolver::IdentityResolver,
        tokens::TokenService,
    },
    error::AuthError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/validate-token", post(validate_token))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/verify-reset-password", get(verify_reset_password))
        .route("/auth/reset-password", post(reset_password))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/auth/me", get(get_me))
}

#[instrument(skip(resolver, payload))]
pub async fn signup(
    State(resolver): State<Arc<IdentityResolver>>,
    Json(payload): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), AuthError> {
    let email = normalize_email(&payload.email)?;
    if payload.password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    let name = payload
        .name
        .map(|n| n.trim().to_owned())
        .filter(|n| !n.is_empty());

    resolver
        .register_password_account(&email, &payload.password, name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            message: "Signup successful",
            status_code: StatusCode::CREATED.as_u16(),
        }),
    ))
}

#[instrument(skip(resolver, payload))]
pub async fn login(
    State(resolver): State<Arc<IdentityResolver>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let email = normalize_email(&payload.email)?;
    if payload.password.is_empty() {
        return Err(AuthError::bad_request("Password is required"));
    }

    let outcome = resolver.login_with_password(&email, &payload.password).await?;
    Ok(Json(LoginResponse {
        auth_token: outcome.access_token,
        user_id: outcome.account.id,
        name: outcome.account.name,
        email: outcome.account.email,
        login_type: outcome.account.login_type,
    }))
}

/// Tokens are stateless; the client discards its copy.
#[instrument(skip(tokens, payload), fields(user_id = %payload.user_id))]
pub async fn logout(
    State(tokens): State<Arc<TokenService>>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    tokens.validate_access_token(&payload.auth_token, payload.user_id)?;
    info!("user logged out");
    Ok(Json(MessageResponse {
        success: true,
        message: "Logout successful",
        status_code: StatusCode::OK.as_u16(),
    }))
}

#[instrument(skip(tokens, payload), fields(user_id = %payload.user_id))]
pub async fn validate_token(
    State(tokens): State<Arc<TokenService>>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<ValidateTokenResponse>, AuthError> {
    let validated = tokens.validate_access_token(&payload.auth_token, payload.user_id)?;
    Ok(Json(ValidateTokenResponse {
        user_id: validated.account_id,
        token: payload.auth_token,
        expiration: validated.expires_at,
        success: true,
    }))
}

#[instrument(skip(resolver, payload))]
pub async fn forgot_password(
    State(resolver): State<Arc<IdentityResolver>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let email = normalize_email(&payload.email)?;
    resolver.request_password_reset(&email).await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "If the account exists, a reset link has been sent",
        status_code: StatusCode::OK.as_u16(),
    }))
}

#[instrument(skip(resolver, query))]
pub async fn verify_reset_password(
    State(resolver): State<Arc<IdentityResolver>>,
    Query(query): Query<VerifyResetQuery>,
) -> Result<Response, AuthError> {
    let email = normalize_email(&query.email)?;
    let target = resolver.verify_reset_link(&email, query.token.trim()).await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, target)]).into_response())
}

#[instrument(skip(resolver, payload))]
pub async fn reset_password(
    State(resolver): State<Arc<IdentityResolver>>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    let email = normalize_email(&payload.email)?;
    resolver
        .reset_password(
            &email,
            payload.token.trim(),
            &payload.password,
            &payload.confirm_password,
        )
        .await?;
    Ok(Json(MessageResponse {
        success: true,
        message: "Password reset successful",
        status_code: StatusCode::OK.as_u16(),
    }))
}

#[instrument(skip(resolver, auth), fields(account_id = %auth.0.account_id))]
pub async fn get_me(
    State(resolver): State<Arc<IdentityResolver>>,
    auth: AuthAccount,
) -> Result<Json<PublicAccount>, AuthError> {
    let account = resolver.account(auth.0.account_id).await?;
    Ok(Json(account.into()))
}
