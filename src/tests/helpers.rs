use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

use crate::config::{
    AuthSettings, Backend, CacheSettings, EmailDelivery, JwtSettings, MailProviderKind,
    MailSettings, RateLimitSettings, Settings,
};
use crate::db::{create_memory_pool, CacheError, CacheStore, MemoryStore, SqliteUserStore};
use crate::models::email::EmailMessage;
use crate::models::jwt::RefreshToken;
use crate::models::user::{User, LEVEL_MEMBER, STATUS_ACTIVE};
use crate::services::mail_service::{EmailSender, MailError};
use crate::services::user_service::CreateUser;
use crate::{create_router, AppState};

pub const PASSWORD: &str = "password123";

/// Socket peer of every test request. Trusted as a proxy by [`test_settings`].
pub const TEST_PEER: [u8; 4] = [127, 0, 0, 1];

static INIT: Once = Once::new();

/// Initialize logging exactly once
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_target(false)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_max_level(Level::ERROR)
            .with_span_events(FmtSpan::NONE)
            .init();
    });
}

pub fn test_settings() -> Settings {
    Settings {
        server_address: "127.0.0.1:0".to_string(),
        database_url: "sqlite::memory:".to_string(),
        cache: CacheSettings {
            backend: Backend::Memory,
            queue_backend: Backend::Memory,
            redis_url: String::new(),
            timeout: Duration::from_secs(1),
        },
        jwt: JwtSettings {
            secret: "test-signing-secret".to_string(),
            encrypt_key: *b"0123456789abcdef0123456789abcdef",
            issuer: "user-management-api".to_string(),
            access_ttl: Duration::from_secs(15 * 60),
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        },
        auth: AuthSettings {
            bcrypt_cost: 4,
            login_max_attempts: 5,
            login_window: Duration::from_secs(300),
            reset_token_ttl: Duration::from_secs(60 * 60),
            reset_request_cooldown: Duration::from_secs(10 * 60),
            password_reset_url: "http://localhost:3000/reset-password".to_string(),
        },
        rate_limit: RateLimitSettings {
            per_second: 1000,
            burst: 1000,
        },
        mail: MailSettings {
            delivery: EmailDelivery::Direct,
            provider: MailProviderKind::Log,
            sender: "no-reply@example.com".to_string(),
            sender_name: "User Management".to_string(),
            mailtrap_url: String::new(),
            mailtrap_api_key: String::new(),
            max_retries: 1,
            timeout: Duration::from_secs(1),
        },
        page_limit_default: 10,
        trusted_proxies: vec![IpAddr::from(TEST_PEER)],
    }
}

/// Keeps every email instead of sending it. With `fail_sends(true)` the
/// email is still recorded but the send reports an error.
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmailSender for RecordingMailer {
    async fn send_mail(&self, email: &EmailMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(email.clone());
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Provider {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "provider unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Memory cache that can refuse refresh-token record writes.
///
/// `fail_refresh_writes(Some(false))` rejects storing live records (a new
/// token), `Some(true)` rejects storing revoked ones (a revocation).
pub struct FlakyCache {
    inner: Arc<MemoryStore>,
    fail_refresh_writes: Mutex<Option<bool>>,
}

impl FlakyCache {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_refresh_writes: Mutex::new(None),
        }
    }

    pub fn fail_refresh_writes(&self, revoked: Option<bool>) {
        *self.fail_refresh_writes.lock().unwrap() = revoked;
    }

    fn rejects(&self, key: &str, value: &str) -> bool {
        let Some(revoked) = *self.fail_refresh_writes.lock().unwrap() else {
            return false;
        };
        key.starts_with("refresh_token:")
            && serde_json::from_str::<RefreshToken>(value)
                .map(|record| record.revoked == revoked)
                .unwrap_or(false)
    }
}

#[async_trait]
impl CacheStore for FlakyCache {
    async fn get(&self, key: &str) -> Result<String, CacheError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if self.rejects(key, value) {
            return Err(CacheError::Timeout);
        }
        self.inner.set(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key_or_pattern: &str) -> Result<(), CacheError> {
        self.inner.delete(key_or_pattern).await
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub cache: Arc<MemoryStore>,
    pub mailer: Arc<RecordingMailer>,
}

pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(test_settings()).await
}

pub async fn setup_test_app_with(settings: Settings) -> TestApp {
    let cache = Arc::new(MemoryStore::new());
    build_test_app(settings, cache.clone(), cache).await
}

/// Test app whose cache is a [`FlakyCache`].
pub async fn setup_flaky_test_app() -> (TestApp, Arc<FlakyCache>) {
    let memory = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyCache::new(memory.clone()));
    let app = build_test_app(test_settings(), memory, flaky.clone()).await;
    (app, flaky)
}

async fn build_test_app(
    settings: Settings,
    memory: Arc<MemoryStore>,
    cache: Arc<dyn CacheStore>,
) -> TestApp {
    init_tracing();
    info!("Setting up test application");

    let pool = create_memory_pool()
        .await
        .expect("Failed to create test database");
    let mailer = Arc::new(RecordingMailer::default());

    let state = AppState::new(
        Arc::new(SqliteUserStore::new(pool)),
        cache,
        mailer.clone(),
        &settings,
    );

    TestApp {
        router: create_router(state.clone()),
        state,
        cache: memory,
        mailer,
    }
}

pub async fn create_test_user(app: &TestApp, email: &str) -> User {
    app.state
        .users
        .create_user(CreateUser {
            full_name: "Test User".to_string(),
            email: email.to_string(),
            age: Some(28),
            password: PASSWORD.to_string(),
            status: STATUS_ACTIVE,
            level: LEVEL_MEMBER,
        })
        .await
        .expect("Failed to create test user")
}

pub fn bearer(token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "authorization",
        format!("Bearer {token}").parse().expect("valid header"),
    );
    headers
}

pub fn from_ip(ip: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", ip.parse().expect("valid header"));
    headers
}

pub async fn test_request(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    headers: Option<HeaderMap>,
    cookies: Option<&[(&str, &str)]>,
) -> (StatusCode, String, HeaderMap) {
    info!(method = %method, uri = %uri, "Making test request");

    let body = if let Some(json) = body {
        Body::from(serde_json::to_string(&json).unwrap())
    } else {
        Body::empty()
    };

    let mut request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .extension(ConnectInfo(SocketAddr::from((TEST_PEER, 40000))));

    // Add cookies if provided
    if let Some(cookies) = cookies {
        if !cookies.is_empty() {
            let cookie_header = cookies
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; ");
            request = request.header("cookie", cookie_header);
        }
    }

    // Add custom headers if provided
    if let Some(custom_headers) = headers {
        for (key, value) in custom_headers.iter() {
            request = request.header(key, value);
        }
    }

    let request = request.body(body).unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = String::from_utf8(
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();

    info!(status = %status, body = %body, "Test response received");
    (status, body, headers)
}

pub fn json(body: &str) -> Value {
    serde_json::from_str(body).expect("response body is JSON")
}

/// Log in over HTTP and return `(access_token, refresh_token)`.
pub async fn login(app: &TestApp, email: &str, password: &str, ip: &str) -> (String, String) {
    let (status, body, _) = test_request(
        app.router.clone(),
        "POST",
        "/api/v1/auth/login",
        Some(serde_json::json!({ "email": email, "password": password })),
        Some(from_ip(ip)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");

    let body = json(&body);
    (
        body["data"]["access_token"].as_str().unwrap().to_string(),
        body["data"]["refresh_token"].as_str().unwrap().to_string(),
    )
}
