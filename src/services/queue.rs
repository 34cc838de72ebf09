use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, instrument};

use crate::models::email::EmailMessage;
use crate::services::mail_service::{EmailSender, MailError};

pub const EMAIL_QUEUE: &str = "auth_email_queue";

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("queue operation timed out")]
    Timeout,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Publish/consume primitive over named queues.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError>;

    /// Wait up to `wait` for the next message. `None` when nothing arrived.
    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<String>, QueueError>;
}

/* ---------- REDIS ---------- */

/// Redis list used as a FIFO: `LPUSH` to publish, `BRPOP` to consume.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, timeout: Duration) -> Self {
        Self { conn, timeout }
    }
}

#[async_trait]
impl MessageQueue for RedisQueue {
    #[instrument(skip(self, body))]
    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(queue).arg(body);
        tokio::time::timeout(self.timeout, cmd.query_async::<_, ()>(&mut conn))
            .await
            .map_err(|_| QueueError::Timeout)??;
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("BRPOP");
        cmd.arg(queue).arg(wait.as_secs().max(1));

        let reply: Option<(String, String)> =
            tokio::time::timeout(wait + self.timeout, cmd.query_async(&mut conn))
                .await
                .map_err(|_| QueueError::Timeout)??;
        Ok(reply.map(|(_, body)| body))
    }
}

/* ---------- IN-MEMORY ---------- */

#[derive(Default)]
pub struct MemoryQueue {
    queues: DashMap<String, VecDeque<String>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, queue: &str) -> usize {
        self.queues.get(queue).map_or(0, |q| q.len())
    }

    fn pop(&self, queue: &str) -> Option<String> {
        self.queues.get_mut(queue).and_then(|mut q| q.pop_front())
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn publish(&self, queue: &str, body: &str) -> Result<(), QueueError> {
        self.queues
            .entry(queue.to_string())
            .or_default()
            .push_back(body.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, queue: &str, wait: Duration) -> Result<Option<String>, QueueError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(body) = self.pop(queue) {
                return Ok(Some(body));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(self.pop(queue));
            }
        }
    }
}

/* ---------- EMAIL PUBLISHER ---------- */

/// Hands emails to the worker through [`EMAIL_QUEUE`].
pub struct QueuedEmailSender {
    queue: Arc<dyn MessageQueue>,
}

impl QueuedEmailSender {
    pub fn new(queue: Arc<dyn MessageQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl EmailSender for QueuedEmailSender {
    async fn send_mail(&self, email: &EmailMessage) -> Result<(), MailError> {
        let body = serde_json::to_string(email).map_err(|e| MailError::Queue(e.to_string()))?;
        self.queue
            .publish(EMAIL_QUEUE, &body)
            .await
            .map_err(|e| MailError::Queue(e.to_string()))?;
        debug!(queue = EMAIL_QUEUE, category = %email.category, "Email queued");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::email::Address;

    #[tokio::test]
    async fn memory_queue_is_fifo_per_queue() {
        let queue = MemoryQueue::new();
        queue.publish("a", "1").await.unwrap();
        queue.publish("a", "2").await.unwrap();
        queue.publish("b", "x").await.unwrap();

        let wait = Duration::from_millis(10);
        assert_eq!(queue.receive("a", wait).await.unwrap().as_deref(), Some("1"));
        assert_eq!(queue.receive("a", wait).await.unwrap().as_deref(), Some("2"));
        assert_eq!(queue.receive("a", wait).await.unwrap(), None);
        assert_eq!(queue.len("b"), 1);
    }

    #[tokio::test]
    async fn receive_wakes_on_publish() {
        let queue = Arc::new(MemoryQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive("q", Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish("q", "hello").await.unwrap();

        let received = consumer.await.unwrap().unwrap();
        assert_eq!(received.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn queued_sender_publishes_json_email() {
        let queue = Arc::new(MemoryQueue::new());
        let sender = QueuedEmailSender::new(queue.clone());
        let email = EmailMessage {
            from: None,
            to: vec![Address::new("carol@example.com")],
            subject: "Reset".to_string(),
            text: "link".to_string(),
            category: "password_reset".to_string(),
        };

        sender.send_mail(&email).await.unwrap();

        let body = queue
            .receive(EMAIL_QUEUE, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        let decoded: EmailMessage = serde_json::from_str(&body).unwrap();
        assert_eq!(decoded, email);
    }
}
