use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use tower_cookies::Cookies;
use validator::Validate;

use crate::{
    api::{
        extract::ValidatedJson,
        response::{success, success_message, ApiResponse},
    },
    error::{AppError, ErrorCode},
    middleware::ClientIp,
    models::jwt::TokenGrant,
    services::cookie_service::CookieService,
    AppState,
};

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, max = 72, message = "is required"))]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshTokenRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "is required"))]
    pub token: String,
    #[validate(length(min = 8, max = 72, message = "must be 8 to 72 characters"))]
    pub new_password: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
        .route("/logout", post(logout))
        .route("/forgot-password", post(forgot_password))
        .route("/reset-password", post(reset_password))
}

pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    cookies: Cookies,
    ValidatedJson(payload): ValidatedJson<LoginRequest>,
) -> Result<Json<ApiResponse<TokenGrant>>, AppError> {
    let grant = state
        .auth
        .login(&ip, &payload.email, &payload.password)
        .await?;

    CookieService::set_refresh_token(&cookies, &grant.refresh_token, state.refresh_ttl);
    Ok(success("Login successfully", grant))
}

/// Body first, cookie second.
fn presented_refresh_token(
    body: Option<Json<RefreshTokenRequest>>,
    cookies: &Cookies,
) -> Result<String, AppError> {
    body.and_then(|Json(body)| body.refresh_token)
        .filter(|t| !t.is_empty())
        .or_else(|| CookieService::refresh_token(cookies))
        .ok_or_else(|| AppError::new(ErrorCode::BadRequest, "Refresh token is required"))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    cookies: Cookies,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<Json<ApiResponse<TokenGrant>>, AppError> {
    let presented = presented_refresh_token(body, &cookies)?;
    let grant = state.auth.refresh_token(&presented).await?;

    CookieService::set_refresh_token(&cookies, &grant.refresh_token, state.refresh_ttl);
    Ok(success("Refresh token generated successfully", grant))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    cookies: Cookies,
    body: Option<Json<RefreshTokenRequest>>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    let presented = presented_refresh_token(body, &cookies)?;

    state.auth.logout(authorization, &presented).await?;

    CookieService::clear_refresh_token(&cookies);
    Ok(success_message("Logout successfully"))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state.auth.request_forgot_password(&payload.email).await?;
    Ok(success_message(
        "Reset link sent to your email, it will expire in 1 hour",
    ))
}

pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, AppError> {
    state
        .auth
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(success_message("Password reset successfully"))
}
