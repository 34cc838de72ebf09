//! Per-key token buckets.
//!
//! Used twice: as the login throttle keyed by client IP, and as the general
//! API rate limiter. Buckets are created lazily and dropped either explicitly
//! through [`KeyedThrottle::reset`] or by the idle sweeper.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThrottleError {
    #[error("too many attempts from {key}")]
    Exhausted { key: String },
}

struct Bucket {
    limiter: Arc<DefaultDirectRateLimiter>,
    last_seen: Instant,
}

#[derive(Clone)]
pub struct KeyedThrottle {
    buckets: Arc<DashMap<String, Bucket>>,
    quota: Quota,
}

/// Login attempts, keyed by client IP.
pub type LoginThrottle = KeyedThrottle;

impl KeyedThrottle {
    pub fn new(quota: Quota) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            quota,
        }
    }

    /// `max_attempts` tokens, refilled evenly over `window`.
    pub fn per_window(max_attempts: u32, window: Duration) -> Self {
        let burst = NonZeroU32::new(max_attempts).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(window / burst.get())
            .unwrap_or_else(|| Quota::per_second(burst))
            .allow_burst(burst);
        Self::new(quota)
    }

    pub fn per_second(per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        Self::new(Quota::per_second(rate).allow_burst(burst))
    }

    pub fn check_and_consume(&self, key: &str) -> Result<(), ThrottleError> {
        // Clone the limiter out so no shard lock is held while checking.
        let limiter = {
            let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
                limiter: Arc::new(RateLimiter::direct(self.quota)),
                last_seen: Instant::now(),
            });
            bucket.last_seen = Instant::now();
            bucket.limiter.clone()
        };

        limiter.check().map_err(|_| {
            warn!(key, "Throttle exhausted");
            ThrottleError::Exhausted {
                key: key.to_string(),
            }
        })
    }

    pub fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    /// Drop buckets not touched for longer than `max_idle`. Returns how many
    /// were removed.
    pub fn sweep_idle(&self, max_idle: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.last_seen.elapsed() <= max_idle);
        before.saturating_sub(self.buckets.len())
    }

    pub fn spawn_sweeper(&self, max_idle: Duration) -> JoinHandle<()> {
        let throttle = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let removed = throttle.sweep_idle(max_idle);
                if removed > 0 {
                    debug!(removed, "Swept idle throttle entries");
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_burst_then_rejects() {
        let throttle = KeyedThrottle::per_window(5, Duration::from_secs(300));
        for _ in 0..5 {
            assert!(throttle.check_and_consume("10.0.0.1").is_ok());
        }
        assert_eq!(
            throttle.check_and_consume("10.0.0.1"),
            Err(ThrottleError::Exhausted {
                key: "10.0.0.1".to_string()
            })
        );
    }

    #[test]
    fn keys_are_independent() {
        let throttle = KeyedThrottle::per_window(1, Duration::from_secs(300));
        assert!(throttle.check_and_consume("a").is_ok());
        assert!(throttle.check_and_consume("a").is_err());
        assert!(throttle.check_and_consume("b").is_ok());
    }

    #[test]
    fn reset_restores_a_full_bucket() {
        let throttle = KeyedThrottle::per_window(2, Duration::from_secs(300));
        throttle.check_and_consume("ip").unwrap();
        throttle.check_and_consume("ip").unwrap();
        assert!(throttle.check_and_consume("ip").is_err());

        throttle.reset("ip");
        assert!(throttle.is_empty());
        assert!(throttle.check_and_consume("ip").is_ok());
    }

    #[test]
    fn sweep_drops_only_idle_entries() {
        let throttle = KeyedThrottle::per_second(5, 10);
        throttle.check_and_consume("fresh").unwrap();
        assert_eq!(throttle.sweep_idle(Duration::from_secs(60)), 0);
        assert_eq!(throttle.len(), 1);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(throttle.sweep_idle(Duration::from_millis(5)), 1);
        assert!(throttle.is_empty());
    }

    #[test]
    fn clones_share_state() {
        let throttle = KeyedThrottle::per_window(1, Duration::from_secs(60));
        let other = throttle.clone();
        throttle.check_and_consume("ip").unwrap();
        assert!(other.check_and_consume("ip").is_err());
    }
}
