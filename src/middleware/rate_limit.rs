use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, middleware::client_ip::ClientIp, AppState};

/// General per-IP request limiter applied to the whole API.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    state
        .api_limiter
        .check_and_consume(&ip)
        .map_err(|_| AppError::too_many_requests("Too many requests"))?;

    Ok(next.run(request).await)
}
