use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use user_management_api::{
    config::{Backend, EmailDelivery, Settings},
    create_router,
    db::{self, CacheStore, MemoryStore, RedisStore, SqliteUserStore},
    error::BoxError,
    services::{
        mail_service::{create_provider, EmailSender, MailService},
        queue::{MessageQueue, MemoryQueue, QueuedEmailSender, RedisQueue},
    },
    AppState,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BoxError> {
    let settings = Settings::from_env()?;

    // Initialize database
    let pool = db::create_db_pool(&settings.database_url).await?;
    let users = Arc::new(SqliteUserStore::new(pool));

    let redis = match (settings.cache.backend, settings.cache.queue_backend) {
        (Backend::Memory, Backend::Memory) => None,
        _ => Some(RedisStore::connect(&settings.cache.redis_url, settings.cache.timeout).await?),
    };

    let cache: Arc<dyn CacheStore> = match (&settings.cache.backend, &redis) {
        (Backend::Redis, Some(redis)) => Arc::new(redis.clone()),
        _ => Arc::new(MemoryStore::new()),
    };

    let mailer: Arc<dyn EmailSender> = match settings.mail.delivery {
        EmailDelivery::Direct => {
            let provider = create_provider(&settings.mail)?;
            Arc::new(MailService::new(provider, settings.mail.max_retries))
        }
        EmailDelivery::Queue => {
            let queue: Arc<dyn MessageQueue> = match (&settings.cache.queue_backend, &redis) {
                (Backend::Redis, Some(redis)) => {
                    Arc::new(RedisQueue::new(redis.connection(), settings.cache.timeout))
                }
                _ => Arc::new(MemoryQueue::new()),
            };
            Arc::new(QueuedEmailSender::new(queue))
        }
    };

    let state = AppState::new(users, cache, mailer, &settings);
    state
        .auth
        .throttle()
        .spawn_sweeper(settings.auth.login_window * 3);
    state
        .api_limiter
        .spawn_sweeper(std::time::Duration::from_secs(3 * 60));

    // Create the router
    let app = create_router(state);

    let addr: SocketAddr = settings.server_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}
