use std::sync::Arc;

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AuthSettings;
use crate::db::{CacheError, CacheStore, StoreError, UserStore};
use crate::error::AppError;
use crate::models::email::{Address, EmailMessage};
use crate::models::jwt::TokenGrant;
use crate::models::user::User;
use crate::services::jwt_service::{TokenError, TokenService};
use crate::services::login_throttle::LoginThrottle;
use crate::services::mail_service::EmailSender;
use crate::utils::crypto::random_token;
use crate::utils::password::{hash_password, verify_password};
use crate::utils::strings::normalize_email;

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const INVALID_REFRESH_TOKEN: &str = "Refresh token is invalid or revoked";
const RESET_TOKEN_BYTES: usize = 16;
const DUMMY_PASSWORD: &str = "not-a-real-password";

pub fn reset_token_key(token: &str) -> String {
    format!("reset:{token}")
}

pub fn reset_ratelimit_key(email: &str) -> String {
    format!("reset:ratelimit:{email}")
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
    cache: Arc<dyn CacheStore>,
    throttle: LoginThrottle,
    mailer: Arc<dyn EmailSender>,
    settings: AuthSettings,
    /// Verified against on unknown emails so both login failures cost one
    /// bcrypt check.
    dummy_hash: Arc<str>,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        tokens: Arc<TokenService>,
        cache: Arc<dyn CacheStore>,
        throttle: LoginThrottle,
        mailer: Arc<dyn EmailSender>,
        settings: AuthSettings,
    ) -> Self {
        let dummy_hash = hash_password(DUMMY_PASSWORD, settings.bcrypt_cost).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to prepare dummy password hash");
            String::new()
        });

        Self {
            users,
            tokens,
            cache,
            throttle,
            mailer,
            settings,
            dummy_hash: dummy_hash.into(),
        }
    }

    pub fn throttle(&self) -> &LoginThrottle {
        &self.throttle
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, ip: &str, email: &str, password: &str) -> Result<TokenGrant, AppError> {
        self.throttle.check_and_consume(ip).map_err(|_| {
            AppError::too_many_requests("Too many login attempts. Please try again later")
        })?;

        let email = normalize_email(email);
        let user = match self.users.get_by_email(&email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                // Unknown emails cost an extra attempt.
                let _ = self.throttle.check_and_consume(ip);
                verify_password(password, &self.dummy_hash);
                return Err(AppError::unauthorized(INVALID_CREDENTIALS));
            }
            Err(e) => return Err(AppError::internal("Failed to load user", e)),
        };

        if !verify_password(password, &user.password_hash) {
            return Err(AppError::unauthorized(INVALID_CREDENTIALS));
        }

        let grant = self.issue_tokens(&user).await?;
        self.throttle.reset(ip);

        info!(user_uuid = %user.user_uuid, "User logged in");
        Ok(grant)
    }

    #[instrument(skip_all)]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, AppError> {
        let record = self
            .tokens
            .validate_refresh_token(refresh_token)
            .await
            .map_err(refresh_error)?;

        let user = match self.users.find_by_uuid(record.user_uuid).await {
            Ok(user) if user.deleted_at.is_none() => user,
            Ok(_) | Err(StoreError::NotFound) => {
                return Err(AppError::unauthorized("User not found"))
            }
            Err(e) => return Err(AppError::internal("Failed to load user", e)),
        };

        let claimed = self
            .tokens
            .claim_rotation(&record)
            .await
            .map_err(|e| AppError::internal("Unable to rotate refresh token", e))?;
        if !claimed {
            warn!(user_uuid = %user.user_uuid, "Concurrent refresh token rotation rejected");
            return Err(AppError::unauthorized(INVALID_REFRESH_TOKEN));
        }

        let access_token = self
            .tokens
            .generate_access_token(&user)
            .map_err(|e| AppError::internal("Unable to create access token", e))?;
        let new_refresh = self
            .tokens
            .generate_refresh_token(&user)
            .map_err(|e| AppError::internal("Unable to create refresh token", e))?;

        if let Err(e) = self.tokens.revoke_refresh_token(refresh_token).await {
            // The old token is still valid; let a retry rotate it.
            if let Err(release) = self.tokens.release_rotation(&record).await {
                warn!(error = %release, "Failed to release rotation claim");
            }
            return Err(AppError::internal("Unable to revoke token", e));
        }

        // The old token is already revoked here; a failure leaves the client
        // without a session.
        self.tokens
            .store_refresh_token(&new_refresh)
            .await
            .map_err(|e| AppError::internal("Cannot save refresh token", e))?;

        Ok(TokenGrant {
            access_token,
            refresh_token: new_refresh.token,
            expires_in: self.tokens.access_ttl().as_secs(),
        })
    }

    /// `authorization` is the raw `Authorization` header value, if any.
    #[instrument(skip_all)]
    pub async fn logout(
        &self,
        authorization: Option<&str>,
        refresh_token: &str,
    ) -> Result<(), AppError> {
        let access_token = authorization
            .and_then(bearer_token)
            .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;

        let claims = self
            .tokens
            .parse_token(access_token)
            .map_err(|_| AppError::unauthorized("Invalid access token"))?;
        let payload = self
            .tokens
            .open_payload(&claims)
            .map_err(|_| AppError::unauthorized("Invalid access token"))?;

        let record = self
            .tokens
            .validate_refresh_token(refresh_token)
            .await
            .map_err(refresh_error)?;
        if record.user_uuid.to_string() != payload.user_uuid {
            warn!(user_uuid = %payload.user_uuid, "Logout with another user's refresh token");
            return Err(AppError::unauthorized(INVALID_REFRESH_TOKEN));
        }

        self.tokens
            .revoke_access_token(&claims)
            .await
            .map_err(|e| AppError::internal("Unable to revoke access token", e))?;

        self.tokens
            .revoke_refresh_token(refresh_token)
            .await
            .map_err(|e| AppError::internal("Unable to revoke token", e))?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn request_forgot_password(&self, email: &str) -> Result<(), AppError> {
        let email = normalize_email(email);
        let ratelimit_key = reset_ratelimit_key(&email);

        match self.cache.exists(&ratelimit_key).await {
            Ok(true) => {
                return Err(AppError::too_many_requests(
                    "Please wait before requesting another password reset",
                ))
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Reset rate limit check failed"),
        }

        let user = match self.users.get_by_email(&email).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => return Err(AppError::not_found("Email not found")),
            Err(e) => return Err(AppError::internal("Failed to load user", e)),
        };

        let token = random_token(RESET_TOKEN_BYTES)
            .map_err(|e| AppError::internal("Failed to generate reset token", e))?;

        self.cache
            .set(
                &reset_token_key(&token),
                &user.user_uuid.to_string(),
                self.settings.reset_token_ttl,
            )
            .await
            .map_err(|e| AppError::internal("Failed to store reset token", e))?;

        self.cache
            .set(&ratelimit_key, "1", self.settings.reset_request_cooldown)
            .await
            .map_err(|e| AppError::internal("Failed to store reset rate limit", e))?;

        let email_message = self.reset_email(&user, &token);
        if let Err(e) = self.mailer.send_mail(&email_message).await {
            error!(error = %e, user_uuid = %user.user_uuid, "Failed to send password reset email");
        }

        Ok(())
    }

    #[instrument(skip_all)]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AppError> {
        let key = reset_token_key(token);
        let user_uuid = match self.cache.get(&key).await {
            Ok(value) => value,
            Err(CacheError::Miss) => {
                return Err(AppError::not_found("Invalid or expired token"))
            }
            Err(e) => return Err(AppError::internal("Failed to get reset token", e)),
        };
        let user_uuid = Uuid::parse_str(&user_uuid)
            .map_err(|e| AppError::internal("Stored user uuid is invalid", e))?;

        let hash = hash_password(new_password, self.settings.bcrypt_cost)
            .map_err(|e| AppError::internal("Failed to hash password", e))?;

        self.users
            .update_password(user_uuid, &hash)
            .await
            .map_err(|e| AppError::internal("Failed to update new password", e))?;

        if let Err(e) = self.cache.delete(&key).await {
            error!(error = %e, "Failed to delete used reset token");
        }

        info!(%user_uuid, "Password reset");
        Ok(())
    }

    async fn issue_tokens(&self, user: &User) -> Result<TokenGrant, AppError> {
        let access_token = self
            .tokens
            .generate_access_token(user)
            .map_err(|e| AppError::internal("Unable to create access token", e))?;

        let refresh = self
            .tokens
            .generate_refresh_token(user)
            .map_err(|e| AppError::internal("Unable to create refresh token", e))?;

        self.tokens
            .store_refresh_token(&refresh)
            .await
            .map_err(|e| AppError::internal("Cannot save refresh token", e))?;

        Ok(TokenGrant {
            access_token,
            refresh_token: refresh.token,
            expires_in: self.tokens.access_ttl().as_secs(),
        })
    }

    fn reset_email(&self, user: &User, token: &str) -> EmailMessage {
        let link = format!("{}?token={}", self.settings.password_reset_url, token);
        let minutes = self.settings.reset_token_ttl.as_secs() / 60;

        EmailMessage {
            from: None,
            to: vec![Address {
                email: user.email.clone(),
                name: Some(user.full_name.clone()),
            }],
            subject: "Password Reset Request".to_string(),
            text: format!(
                "Hi {},\n\nYou requested to reset your password. Use the link below to choose a new one:\n{}\n\nThe link expires in {} minutes.",
                user.full_name, link, minutes
            ),
            category: "password_reset".to_string(),
        }
    }
}

fn refresh_error(err: TokenError) -> AppError {
    match err {
        TokenError::InvalidRefreshToken => AppError::unauthorized(INVALID_REFRESH_TOKEN),
        other => AppError::internal("Failed to read refresh token", other),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::JwtSettings;
    use crate::db::{create_memory_pool, MemoryStore, SqliteUserStore};
    use crate::error::ErrorCode;
    use crate::services::mail_service::MailError;

    struct NullMailer;

    #[async_trait]
    impl EmailSender for NullMailer {
        async fn send_mail(&self, _email: &EmailMessage) -> Result<(), MailError> {
            Ok(())
        }
    }

    async fn service() -> AuthService {
        let cache = Arc::new(MemoryStore::new());
        let jwt = JwtSettings {
            secret: "unit-test-secret".to_string(),
            encrypt_key: [7; 32],
            issuer: "user-management-api".to_string(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(3600),
        };
        let settings = AuthSettings {
            bcrypt_cost: 4,
            login_max_attempts: 5,
            login_window: Duration::from_secs(300),
            reset_token_ttl: Duration::from_secs(3600),
            reset_request_cooldown: Duration::from_secs(600),
            password_reset_url: "http://localhost/reset".to_string(),
        };

        AuthService::new(
            Arc::new(SqliteUserStore::new(create_memory_pool().await.unwrap())),
            Arc::new(TokenService::new(cache.clone(), &jwt)),
            cache,
            LoginThrottle::per_window(5, Duration::from_secs(300)),
            Arc::new(NullMailer),
            settings,
        )
    }

    #[tokio::test]
    async fn unknown_email_is_checked_against_a_real_hash() {
        let service = service().await;
        assert!(service.dummy_hash.starts_with("$2b$04$"));
        assert!(verify_password(DUMMY_PASSWORD, &service.dummy_hash));

        let err = service
            .login("192.0.2.1", "nobody@example.com", DUMMY_PASSWORD)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert_eq!(err.message, INVALID_CREDENTIALS);
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        assert_eq!(bearer_token("Bearer abc.def"), Some("abc.def"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("abc"), None);
    }

    #[test]
    fn cache_keys_are_namespaced() {
        assert_eq!(reset_token_key("t"), "reset:t");
        assert_eq!(reset_ratelimit_key("a@b.c"), "reset:ratelimit:a@b.c");
    }
}
