use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, Request},
    middleware::Next,
    response::Response,
};
use serde::Serialize;
use tracing::debug;

use crate::{error::AppError, services::auth_service::bearer_token, AppState};

const MISSING_OR_INVALID: &str = "Authorization header missing or invalid";

/// Identity of the caller, decrypted from a valid access token.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub user_uuid: String,
    pub email: String,
    pub role: i32,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .ok_or_else(|| AppError::unauthorized(MISSING_OR_INVALID))?;

    // Bad signature and expiry produce the same response.
    let claims = state
        .tokens
        .parse_token(&token)
        .map_err(|_| AppError::unauthorized(MISSING_OR_INVALID))?;

    let revoked = state
        .tokens
        .is_revoked(&claims.jti)
        .await
        .map_err(|e| AppError::internal("Unable to check token revocation", e))?;
    if revoked {
        debug!(jti = %claims.jti, "Rejected revoked access token");
        return Err(AppError::unauthorized("Token revoked"));
    }

    let payload = state
        .tokens
        .open_payload(&claims)
        .map_err(|_| AppError::unauthorized(MISSING_OR_INVALID))?;

    request.extensions_mut().insert(CurrentUser {
        user_uuid: payload.user_uuid,
        email: payload.email,
        role: payload.role,
    });

    Ok(next.run(request).await)
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::unauthorized(MISSING_OR_INVALID))
    }
}
