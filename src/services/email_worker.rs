use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::models::email::EmailMessage;
use crate::services::mail_service::EmailSender;
use crate::services::queue::{MessageQueue, EMAIL_QUEUE};

const POLL_WAIT: Duration = Duration::from_secs(5);

/// Consumes the email queue and delivers each message.
pub struct EmailWorker {
    queue: Arc<dyn MessageQueue>,
    mailer: Arc<dyn EmailSender>,
    poll_wait: Duration,
}

impl EmailWorker {
    pub fn new(queue: Arc<dyn MessageQueue>, mailer: Arc<dyn EmailSender>) -> Self {
        Self {
            queue,
            mailer,
            poll_wait: POLL_WAIT,
        }
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    /// Run until `shutdown` resolves. A message already taken off the queue
    /// is always finished before returning.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!(queue = EMAIL_QUEUE, "Worker started");

        loop {
            let received = tokio::select! {
                _ = &mut shutdown => break,
                received = self.queue.receive(EMAIL_QUEUE, self.poll_wait) => received,
            };

            match received {
                Ok(Some(body)) => {
                    self.handle(&body).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "Failed to receive from queue");
                    tokio::time::sleep(self.poll_wait).await;
                }
            }
        }

        info!(queue = EMAIL_QUEUE, "Worker stopped");
    }

    /// Decode and send one message. Returns whether it was delivered.
    pub async fn handle(&self, body: &str) -> bool {
        debug!(bytes = body.len(), "Received message");

        let email: EmailMessage = match serde_json::from_str(body) {
            Ok(email) => email,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message");
                return false;
            }
        };

        match self.mailer.send_mail(&email).await {
            Ok(()) => {
                let to: Vec<&str> = email.to.iter().map(|a| a.email.as_str()).collect();
                info!(?to, subject = %email.subject, category = %email.category, "Email sent successfully");
                true
            }
            Err(e) => {
                error!(error = %e, category = %email.category, "Failed to send email");
                false
            }
        }
    }
}
