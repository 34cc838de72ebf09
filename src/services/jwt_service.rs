// src/services/jwt_service.rs
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::JwtSettings;
use crate::db::{CacheError, CacheStore};
use crate::models::jwt::{AccessClaims, AccessPayload, RefreshToken};
use crate::models::user::User;
use crate::utils::crypto::{random_token, CryptoError, PayloadCipher};

const REFRESH_TOKEN_BYTES: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    /// Bad signature, malformed, wrong issuer or expired. Deliberately one
    /// variant.
    #[error("invalid token")]
    InvalidToken,

    #[error("encrypted payload missing from token")]
    MissingPayload,

    #[error("invalid payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("refresh token is invalid or revoked")]
    InvalidRefreshToken,

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("failed to serialize: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub fn refresh_token_key(token: &str) -> String {
    format!("refresh_token:{token}")
}

fn rotation_key(token: &str) -> String {
    format!("refresh_token:rotating:{token}")
}

pub fn revocation_key(jti: &str) -> String {
    format!("backlist:{jti}")
}

/// Mints, validates and revokes access and refresh tokens.
pub struct TokenService {
    cache: Arc<dyn CacheStore>,
    enc_key: EncodingKey,
    dec_key: DecodingKey,
    cipher: PayloadCipher,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(cache: Arc<dyn CacheStore>, settings: &JwtSettings) -> Self {
        Self {
            cache,
            enc_key: EncodingKey::from_secret(settings.secret.as_bytes()),
            dec_key: DecodingKey::from_secret(settings.secret.as_bytes()),
            cipher: PayloadCipher::new(&settings.encrypt_key),
            issuer: settings.issuer.clone(),
            access_ttl: settings.access_ttl,
            refresh_ttl: settings.refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /* ---------- ACCESS TOKENS ---------- */

    #[instrument(skip(self, user), fields(user_uuid = %user.user_uuid))]
    pub fn generate_access_token(&self, user: &User) -> Result<String, TokenError> {
        let payload = AccessPayload {
            user_uuid: user.user_uuid.to_string(),
            email: user.email.clone(),
            role: user.level,
        };
        let raw = serde_json::to_vec(&payload).map_err(TokenError::Serialization)?;
        let sealed = self.cipher.seal(&raw)?;

        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            data: Some(sealed),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.access_ttl.as_secs() as i64,
            iss: self.issuer.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.enc_key).map_err(TokenError::Signing)
    }

    /// Verify signature, issuer and expiry.
    pub fn parse_token(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);

        decode::<AccessClaims>(token, &self.dec_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| TokenError::InvalidToken)
    }

    pub fn decrypt_access_token_payload(&self, token: &str) -> Result<AccessPayload, TokenError> {
        let claims = self.parse_token(token)?;
        self.open_payload(&claims)
    }

    /// Decrypt the payload of already-verified claims.
    pub fn open_payload(&self, claims: &AccessClaims) -> Result<AccessPayload, TokenError> {
        let sealed = claims.data.as_deref().ok_or(TokenError::MissingPayload)?;
        let raw = self.cipher.open(sealed)?;
        serde_json::from_slice(&raw).map_err(TokenError::Payload)
    }

    /* ---------- REFRESH TOKENS ---------- */

    pub fn generate_refresh_token(&self, user: &User) -> Result<RefreshToken, TokenError> {
        let token = random_token(REFRESH_TOKEN_BYTES)?;
        let refresh_ttl = chrono::Duration::from_std(self.refresh_ttl)
            .unwrap_or_else(|_| chrono::Duration::days(7));

        Ok(RefreshToken {
            token,
            user_uuid: user.user_uuid,
            expires_at: Utc::now() + refresh_ttl,
            revoked: false,
        })
    }

    #[instrument(skip_all, fields(user_uuid = %token.user_uuid))]
    pub async fn store_refresh_token(&self, token: &RefreshToken) -> Result<(), TokenError> {
        let value = serde_json::to_string(token).map_err(TokenError::Serialization)?;
        self.cache
            .set(&refresh_token_key(&token.token), &value, self.refresh_ttl)
            .await?;
        Ok(())
    }

    /// Absent, revoked and expired tokens all yield
    /// [`TokenError::InvalidRefreshToken`]. Only cache failures other than a
    /// miss surface separately.
    #[instrument(skip_all)]
    pub async fn validate_refresh_token(&self, token: &str) -> Result<RefreshToken, TokenError> {
        let record = self.load_refresh_token(token).await?;
        if record.revoked || record.is_expired() {
            return Err(TokenError::InvalidRefreshToken);
        }
        Ok(record)
    }

    /// Mark the token revoked. The marker keeps the remaining lifetime of the
    /// original token and then expires on its own.
    #[instrument(skip_all)]
    pub async fn revoke_refresh_token(&self, token: &str) -> Result<(), TokenError> {
        let mut record = self.load_refresh_token(token).await?;
        record.revoked = true;

        let key = refresh_token_key(token);
        match remaining(record.expires_at) {
            Some(ttl) => {
                let value = serde_json::to_string(&record).map_err(TokenError::Serialization)?;
                self.cache.set(&key, &value, ttl).await?;
            }
            None => {
                warn!("Revoking a refresh token that already expired");
                self.cache.delete(&key).await?;
            }
        }
        Ok(())
    }

    /// Claim the right to rotate `token`. Only the first caller wins while
    /// the token is alive.
    pub async fn claim_rotation(&self, record: &RefreshToken) -> Result<bool, TokenError> {
        let Some(ttl) = remaining(record.expires_at) else {
            return Ok(false);
        };
        Ok(self
            .cache
            .set_if_absent(&rotation_key(&record.token), "1", ttl)
            .await?)
    }

    /// Give up a claim taken by [`claim_rotation`](Self::claim_rotation)
    /// whose rotation did not happen.
    pub async fn release_rotation(&self, record: &RefreshToken) -> Result<(), TokenError> {
        Ok(self.cache.delete(&rotation_key(&record.token)).await?)
    }

    /* ---------- REVOCATION LIST ---------- */

    /// Revoke an access token until its own expiry. An already expired token
    /// needs no entry.
    pub async fn revoke_access_token(&self, claims: &AccessClaims) -> Result<(), TokenError> {
        let ttl = claims.exp - Utc::now().timestamp();
        if ttl <= 0 {
            return Ok(());
        }
        self.cache
            .set(&revocation_key(&claims.jti), "revoked", Duration::from_secs(ttl as u64))
            .await?;
        Ok(())
    }

    pub async fn is_revoked(&self, jti: &str) -> Result<bool, TokenError> {
        Ok(self.cache.exists(&revocation_key(jti)).await?)
    }

    /* ---------- PRIVATE HELPERS ---------- */

    async fn load_refresh_token(&self, token: &str) -> Result<RefreshToken, TokenError> {
        let raw = match self.cache.get(&refresh_token_key(token)).await {
            Ok(raw) => raw,
            Err(CacheError::Miss) => return Err(TokenError::InvalidRefreshToken),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&raw).map_err(|_| TokenError::InvalidRefreshToken)
    }
}

fn remaining(expires_at: chrono::DateTime<Utc>) -> Option<Duration> {
    (expires_at - Utc::now())
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
}
