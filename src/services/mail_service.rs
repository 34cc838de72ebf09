use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{MailProviderKind, MailSettings};
use crate::models::email::{Address, EmailMessage};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("failed to build mail client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to mail provider failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected response from mail provider with code {status}: {body}")]
    Provider { status: StatusCode, body: String },

    #[error("failed to enqueue email: {0}")]
    Queue(String),

    #[error("failed to send email after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<MailError>,
    },
}

/// Something that can deliver an [`EmailMessage`].
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_mail(&self, email: &EmailMessage) -> Result<(), MailError>;
}

/* ---------- PROVIDERS ---------- */

pub struct MailtrapProvider {
    client: Client,
    url: String,
    api_key: String,
    sender: Address,
}

impl MailtrapProvider {
    pub fn new(settings: &MailSettings) -> Result<Self, MailError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(MailError::Client)?;

        Ok(Self {
            client,
            url: settings.mailtrap_url.clone(),
            api_key: settings.mailtrap_api_key.clone(),
            sender: Address {
                email: settings.sender.clone(),
                name: Some(settings.sender_name.clone()),
            },
        })
    }
}

#[async_trait]
impl EmailSender for MailtrapProvider {
    async fn send_mail(&self, email: &EmailMessage) -> Result<(), MailError> {
        let mut email = email.clone();
        email.from = Some(self.sender.clone());

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&email)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(operation = "send_mail", %status, response_body = %body, "Unexpected response from mailtrap");
            return Err(MailError::Provider { status, body });
        }

        Ok(())
    }
}

/// Logs emails instead of sending them. Only the envelope is logged; the
/// body can hold live reset links.
pub struct LogProvider;

#[async_trait]
impl EmailSender for LogProvider {
    async fn send_mail(&self, email: &EmailMessage) -> Result<(), MailError> {
        let to: Vec<&str> = email.to.iter().map(|a| a.email.as_str()).collect();
        info!(
            operation = "send_mail",
            ?to,
            subject = %email.subject,
            category = %email.category,
            "Email (log provider)"
        );
        Ok(())
    }
}

pub fn create_provider(settings: &MailSettings) -> Result<Arc<dyn EmailSender>, MailError> {
    Ok(match settings.provider {
        MailProviderKind::Mailtrap => Arc::new(MailtrapProvider::new(settings)?),
        MailProviderKind::Log => Arc::new(LogProvider),
    })
}

/* ---------- RETRYING SERVICE ---------- */

/// Retries a provider with linear backoff: after failed attempt `n` it
/// sleeps `n * backoff_unit`.
pub struct MailService {
    provider: Arc<dyn EmailSender>,
    max_retries: u32,
    backoff_unit: Duration,
}

impl MailService {
    pub fn new(provider: Arc<dyn EmailSender>, max_retries: u32) -> Self {
        Self {
            provider,
            max_retries: max_retries.max(1),
            backoff_unit: Duration::from_secs(1),
        }
    }

    pub fn with_backoff_unit(mut self, backoff_unit: Duration) -> Self {
        self.backoff_unit = backoff_unit;
        self
    }
}

#[async_trait]
impl EmailSender for MailService {
    async fn send_mail(&self, email: &EmailMessage) -> Result<(), MailError> {
        let started = Instant::now();
        let to: Vec<&str> = email.to.iter().map(|a| a.email.as_str()).collect();
        let mut last = MailError::Queue("no attempt made".to_string());

        for attempt in 1..=self.max_retries {
            let attempt_started = Instant::now();
            match self.provider.send_mail(email).await {
                Ok(()) => {
                    info!(
                        operation = "send_mail",
                        attempt,
                        duration_ms = attempt_started.elapsed().as_millis() as u64,
                        ?to,
                        subject = %email.subject,
                        category = %email.category,
                        "Email sent"
                    );
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        operation = "send_mail",
                        attempt,
                        duration_ms = attempt_started.elapsed().as_millis() as u64,
                        error = %e,
                        "Failed to send email, retrying"
                    );
                    last = e;
                    tokio::time::sleep(self.backoff_unit * attempt).await;
                }
            }
        }

        error!(
            operation = "send_mail",
            attempts = self.max_retries,
            duration_ms = started.elapsed().as_millis() as u64,
            ?to,
            "Failed to send email after all retries"
        );
        Err(MailError::RetriesExhausted {
            attempts: self.max_retries,
            last: Box::new(last),
        })
    }
}
