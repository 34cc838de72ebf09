use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use user_management_api::{
    config::{Backend, Settings},
    db::RedisStore,
    error::BoxError,
    services::{
        email_worker::EmailWorker,
        mail_service::{create_provider, MailService},
        queue::{MemoryQueue, MessageQueue, RedisQueue},
    },
};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Worker failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), BoxError> {
    let settings = Settings::from_env()?;

    let queue: Arc<dyn MessageQueue> = match settings.cache.queue_backend {
        Backend::Redis => {
            let redis = RedisStore::connect(&settings.cache.redis_url, settings.cache.timeout).await?;
            Arc::new(RedisQueue::new(redis.connection(), settings.cache.timeout))
        }
        Backend::Memory => {
            info!("Memory queue selected; only messages published in this process are seen");
            Arc::new(MemoryQueue::new())
        }
    };

    let provider = create_provider(&settings.mail)?;
    let mailer = Arc::new(MailService::new(provider, settings.mail.max_retries));

    EmailWorker::new(queue, mailer).run(shutdown_signal()).await;
    info!("Worker shutdown completed");
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
