use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache miss")]
    Miss,

    #[error("ttl must be greater than zero")]
    InvalidTtl,

    #[error("cache operation timed out")]
    Timeout,

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl CacheError {
    pub fn is_miss(&self) -> bool {
        matches!(self, CacheError::Miss)
    }
}

/// Key/value store with per-key expiry.
///
/// Shared by the token service (refresh tokens, revocation entries, reset
/// tokens) and the user service (list caching).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns [`CacheError::Miss`] when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<String, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    /// Write only when the key does not exist yet. Returns whether the write
    /// happened.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete a single key, or every key matching a pattern containing `*`.
    async fn delete(&self, key_or_pattern: &str) -> Result<(), CacheError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process cache used by tests and by `CACHE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining lifetime of a live key.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now)
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<String, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        Err(CacheError::Miss)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: String::new(),
            expires_at: now,
        });
        // The shard stays locked while `entry` is held.
        if entry.is_live(now) {
            return Ok(false);
        }
        entry.value = value.to_string();
        entry.expires_at = now + ttl;
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self.entries.get(key).is_some_and(|e| e.is_live(now)))
    }

    async fn delete(&self, key_or_pattern: &str) -> Result<(), CacheError> {
        if key_or_pattern.contains('*') {
            self.entries.retain(|key, _| !glob_match(key_or_pattern, key));
        } else {
            self.entries.remove(key_or_pattern);
        }
        Ok(())
    }
}

/// Minimal `*`-only glob, enough for the `prefix:*` patterns used here.
fn glob_match(pattern: &str, key: &str) -> bool {
    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or_default();
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };
    let segments: Vec<&str> = parts.collect();
    for (i, segment) in segments.iter().enumerate() {
        if i == segments.len() - 1 {
            return rest.ends_with(segment);
        }
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }
    rest.is_empty()
}
