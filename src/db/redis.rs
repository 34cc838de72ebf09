use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use tracing::{error, info, instrument, warn};

use super::cache::{CacheError, CacheStore};

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl RedisStore {
    #[instrument(skip(redis_url))]
    pub async fn connect(redis_url: &str, timeout: Duration) -> Result<Self, CacheError> {
        info!("Initializing Redis connection");

        let client = Client::open(redis_url).map_err(|e| {
            error!(error = %e, "Failed to create Redis client");
            CacheError::from(e)
        })?;

        let conn = match tokio::time::timeout(timeout, ConnectionManager::new(client)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                error!(error = %e, "Failed to get Redis connection");
                return Err(e.into());
            }
            Err(_) => {
                error!("Timed out connecting to Redis");
                return Err(CacheError::Timeout);
            }
        };

        info!("Redis connection established");
        Ok(Self { conn, timeout })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => {
                warn!("Redis operation timed out");
                Err(CacheError::Timeout)
            }
        }
    }
}

fn ttl_millis(ttl: Duration) -> Result<u64, CacheError> {
    match u64::try_from(ttl.as_millis()) {
        Ok(0) | Err(_) => Err(CacheError::InvalidTtl),
        Ok(ms) => Ok(ms),
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<String, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = self.bounded(conn.get(key)).await?;
        value.ok_or(CacheError::Miss)
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let ms = ttl_millis(ttl)?;
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ms);
        self.bounded(cmd.query_async::<_, ()>(&mut conn)).await
    }

    #[instrument(skip(self, value))]
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let ms = ttl_millis(ttl)?;
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value).arg("PX").arg(ms).arg("NX");
        let reply: Option<String> = self.bounded(cmd.query_async(&mut conn)).await?;
        Ok(reply.is_some())
    }

    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        self.bounded(conn.exists(key)).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, key_or_pattern: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();

        if !key_or_pattern.contains('*') {
            return self.bounded(conn.del::<_, ()>(key_or_pattern)).await;
        }

        let keys: Vec<String> = self.bounded(conn.keys(key_or_pattern)).await?;
        if keys.is_empty() {
            return Ok(());
        }
        self.bounded(conn.del::<_, ()>(&keys)).await?;
        info!(count = keys.len(), pattern = %key_or_pattern, "Cleared cached keys");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_sent_in_milliseconds() {
        assert_eq!(ttl_millis(Duration::from_secs(2)).unwrap(), 2000);
        assert!(matches!(
            ttl_millis(Duration::from_micros(10)),
            Err(CacheError::InvalidTtl)
        ));
    }
}
