use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use dotenv::dotenv;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Redis,
    Memory,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Backend::Redis),
            "memory" => Ok(Backend::Memory),
            other => Err(format!("unknown backend `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailDelivery {
    /// Publish to the email queue and let the worker send it.
    Queue,
    /// Send from the request task.
    Direct,
}

impl FromStr for EmailDelivery {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queue" => Ok(EmailDelivery::Queue),
            "direct" => Ok(EmailDelivery::Direct),
            other => Err(format!("unknown email delivery `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_address: String,
    pub database_url: String,
    pub cache: CacheSettings,
    pub jwt: JwtSettings,
    pub auth: AuthSettings,
    pub rate_limit: RateLimitSettings,
    pub mail: MailSettings,
    pub page_limit_default: u32,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub backend: Backend,
    pub queue_backend: Backend,
    pub redis_url: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct JwtSettings {
    pub secret: String,
    pub encrypt_key: [u8; 32],
    pub issuer: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl std::fmt::Debug for JwtSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSettings")
            .field("issuer", &self.issuer)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub bcrypt_cost: u32,
    pub login_max_attempts: u32,
    pub login_window: Duration,
    pub reset_token_ttl: Duration,
    pub reset_request_cooldown: Duration,
    pub password_reset_url: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub per_second: u32,
    pub burst: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailProviderKind {
    Mailtrap,
    Log,
}

impl FromStr for MailProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mailtrap" => Ok(MailProviderKind::Mailtrap),
            "log" => Ok(MailProviderKind::Log),
            other => Err(format!("unsupported provider type `{other}`")),
        }
    }
}

#[derive(Clone)]
pub struct MailSettings {
    pub delivery: EmailDelivery,
    pub provider: MailProviderKind,
    pub sender: String,
    pub sender_name: String,
    pub mailtrap_url: String,
    pub mailtrap_api_key: String,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("delivery", &self.delivery)
            .field("provider", &self.provider)
            .field("sender", &self.sender)
            .field("mailtrap_url", &self.mailtrap_url)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Load `.env` (if any) and read every setting from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();

        let encrypt_key = required("JWT_ENCRYPT_KEY")?;
        let encrypt_key: [u8; 32] =
            encrypt_key
                .as_bytes()
                .try_into()
                .map_err(|_| ConfigError::Invalid {
                    key: "JWT_ENCRYPT_KEY",
                    reason: format!("expected 32 bytes, got {}", encrypt_key.len()),
                })?;

        Ok(Self {
            server_address: or_default("SERVER_ADDRESS", "127.0.0.1:3000"),
            database_url: or_default("DATABASE_URL", "sqlite:users.db"),
            cache: CacheSettings {
                backend: parsed("CACHE_BACKEND", Backend::Redis)?,
                queue_backend: parsed("QUEUE_BACKEND", Backend::Redis)?,
                redis_url: or_default("REDIS_URL", "redis://127.0.0.1:6379"),
                timeout: Duration::from_secs(parsed("REDIS_TIMEOUT_SECS", 5)?),
            },
            jwt: JwtSettings {
                secret: required("JWT_SECRET")?,
                encrypt_key,
                issuer: or_default("JWT_ISSUER", "user-management-api"),
                access_ttl: Duration::from_secs(15 * 60),
                refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            },
            auth: AuthSettings {
                bcrypt_cost: parsed("BCRYPT_COST", bcrypt::DEFAULT_COST)?,
                login_max_attempts: parsed("LOGIN_MAX_ATTEMPTS", 5)?,
                login_window: Duration::from_secs(parsed("LOGIN_WINDOW_SECS", 300)?),
                reset_token_ttl: Duration::from_secs(60 * 60),
                reset_request_cooldown: Duration::from_secs(10 * 60),
                password_reset_url: or_default(
                    "PASSWORD_RESET_URL",
                    "http://localhost:3000/reset-password",
                ),
            },
            rate_limit: RateLimitSettings {
                per_second: parsed("RATE_LIMIT_PER_SEC", 5)?,
                burst: parsed("RATE_LIMIT_BURST", 10)?,
            },
            mail: MailSettings {
                delivery: parsed("EMAIL_DELIVERY", EmailDelivery::Queue)?,
                provider: parsed("MAIL_PROVIDER", MailProviderKind::Log)?,
                sender: or_default("MAIL_SENDER", "no-reply@example.com"),
                sender_name: or_default("MAIL_SENDER_NAME", "User Management"),
                mailtrap_url: or_default("MAILTRAP_URL", "https://send.api.mailtrap.io/api/send"),
                mailtrap_api_key: or_default("MAILTRAP_API_KEY", ""),
                max_retries: parsed("MAIL_MAX_RETRIES", 3)?,
                timeout: Duration::from_secs(parsed("MAIL_TIMEOUT_SECS", 10)?),
            },
            page_limit_default: parsed("PAGE_LIMIT_DEFAULT", 10)?,
            trusted_proxies: ip_list(
                "TRUSTED_PROXIES",
                &env::var("TRUSTED_PROXIES").unwrap_or_default(),
            )?,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(ConfigError::Missing(key)),
    }
}

fn or_default(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) if !value.is_empty() => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

/// Comma-separated IP addresses; empty means none.
fn ip_list(key: &'static str, raw: &str) -> Result<Vec<IpAddr>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                key,
                reason: format!("`{v}`: {e}"),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backends_case_insensitively() {
        assert_eq!("Redis".parse::<Backend>().unwrap(), Backend::Redis);
        assert_eq!("memory".parse::<Backend>().unwrap(), Backend::Memory);
        assert!("memcached".parse::<Backend>().is_err());
        assert_eq!("QUEUE".parse::<EmailDelivery>().unwrap(), EmailDelivery::Queue);
        assert!("smtp".parse::<MailProviderKind>().is_err());
    }

    #[test]
    fn parsed_falls_back_to_default_when_unset() {
        let value: u32 = parsed("USER_MGMT_TEST_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn trusted_proxies_parse_as_ip_list() {
        let proxies = ip_list("TRUSTED_PROXIES", " 10.0.0.1, ::1 ,").unwrap();
        assert_eq!(
            proxies,
            vec![IpAddr::from([10, 0, 0, 1]), "::1".parse::<IpAddr>().unwrap()]
        );
        assert!(ip_list("TRUSTED_PROXIES", "").unwrap().is_empty());
        assert!(matches!(
            ip_list("TRUSTED_PROXIES", "10.0.0.1,proxy.local"),
            Err(ConfigError::Invalid { key: "TRUSTED_PROXIES", .. })
        ));
    }
}
