use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::FromRef,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_cookies::CookieManagerLayer;
use tower_http::cors::{Any, CorsLayer};

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;
#[cfg(test)]
mod tests;

use crate::config::Settings;
use crate::db::{CacheStore, UserStore};
use crate::middleware::{
    auth_middleware, client_ip::TrustedProxies, rate_limit_middleware, trace_middleware,
};
use crate::services::{
    auth_service::AuthService,
    jwt_service::TokenService,
    login_throttle::{KeyedThrottle, LoginThrottle},
    mail_service::EmailSender,
    user_service::UserService,
};

#[derive(Clone)]
pub struct AppState {
    pub auth: AuthService,
    pub users: UserService,
    pub tokens: Arc<TokenService>,
    pub api_limiter: KeyedThrottle,
    pub refresh_ttl: Duration,
    pub trusted_proxies: TrustedProxies,
}

impl FromRef<AppState> for TrustedProxies {
    fn from_ref(state: &AppState) -> Self {
        state.trusted_proxies.clone()
    }
}

impl AppState {
    pub fn new(
        users: Arc<dyn UserStore>,
        cache: Arc<dyn CacheStore>,
        mailer: Arc<dyn EmailSender>,
        settings: &Settings,
    ) -> Self {
        let tokens = Arc::new(TokenService::new(cache.clone(), &settings.jwt));
        let throttle =
            LoginThrottle::per_window(settings.auth.login_max_attempts, settings.auth.login_window);

        let auth = AuthService::new(
            users.clone(),
            tokens.clone(),
            cache.clone(),
            throttle,
            mailer,
            settings.auth.clone(),
        );
        let user_service = UserService::new(
            users,
            cache,
            settings.auth.bcrypt_cost,
            settings.page_limit_default,
        );

        Self {
            auth,
            users: user_service,
            tokens,
            api_limiter: KeyedThrottle::per_second(
                settings.rate_limit.per_second,
                settings.rate_limit.burst,
            ),
            refresh_ttl: settings.jwt.refresh_ttl,
            trusted_proxies: TrustedProxies::new(settings.trusted_proxies.clone()),
        }
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    // Create a CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let users = api::user::routes()
        .route_layer(from_fn_with_state(state.clone(), auth_middleware));

    let v1 = Router::new()
        .nest("/auth", api::auth::routes())
        .nest("/users", users)
        .layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", v1)
        .layer(CookieManagerLayer::new())
        .layer(from_fn(trace_middleware))
        .layer(cors)
        .with_state(state)
}
