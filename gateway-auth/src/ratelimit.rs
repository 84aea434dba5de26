//! Token-bucket rate limiting per API key and per client IP, grounded in
//! `acton-service::middleware::governor::GovernorRateLimit`.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorLimiter};
use tokio::sync::RwLock;

use crate::error::AuthError;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst_size: 10,
        }
    }
}

impl RateLimitConfig {
    fn quota(&self) -> Quota {
        let per_minute = NonZeroU32::new(self.requests_per_minute.max(1)).unwrap();
        let burst = NonZeroU32::new(self.burst_size.max(1)).unwrap();
        Quota::per_minute(per_minute).allow_burst(burst)
    }
}

type Limiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Keeps one token bucket per distinct key (api key id or client IP),
/// created lazily on first use. Uses a plain `RwLock<HashMap<..>>`
/// rather than a sharded map since contention is bounded by the
/// number of distinct keys seen.
pub struct KeyedRateLimiter {
    config: RateLimitConfig,
    buckets: RwLock<HashMap<String, Arc<Limiter>>>,
}

impl KeyedRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    async fn bucket_for(&self, key: &str) -> Arc<Limiter> {
        if let Some(existing) = self.buckets.read().await.get(key) {
            return existing.clone();
        }
        let mut buckets = self.buckets.write().await;
        buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(GovernorLimiter::direct(self.config.quota())))
            .clone()
    }

    /// Checks and consumes one token for `key`. Returns `RateLimited`
    /// with a whole-second wait estimate when the bucket is empty.
    pub async fn check(&self, key: &str) -> Result<(), AuthError> {
        let bucket = self.bucket_for(key).await;
        match bucket.check() {
            Ok(()) => Ok(()),
            Err(not_until) => {
                let wait = not_until.wait_time_from(governor::clock::Clock::now(&DefaultClock::default()));
                Err(AuthError::RateLimited {
                    retry_after_s: wait.as_secs().max(1),
                })
            }
        }
    }
}

/// Combines a per-key limiter and a per-IP limiter; a request must pass
/// both. Matches the spec's "per key and per IP" requirement.
pub struct RateLimiter {
    pub per_key: KeyedRateLimiter,
    pub per_ip: KeyedRateLimiter,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            per_key: KeyedRateLimiter::new(config),
            per_ip: KeyedRateLimiter::new(config),
        }
    }

    pub async fn check(&self, key_id: &str, client_ip: &str) -> Result<(), AuthError> {
        self.per_key.check(key_id).await?;
        self.per_ip.check(client_ip).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_requests_within_burst() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 3,
        });
        for _ in 0..3 {
            limiter.check("key-a").await.unwrap();
        }
    }

    #[tokio::test]
    async fn rejects_once_burst_exhausted() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 1,
        });
        limiter.check("key-a").await.unwrap();
        let result = limiter.check("key-a").await;
        assert!(matches!(result, Err(AuthError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn distinct_keys_have_independent_buckets() {
        let limiter = KeyedRateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 1,
        });
        limiter.check("key-a").await.unwrap();
        limiter.check("key-b").await.unwrap();
    }

    #[tokio::test]
    async fn combined_limiter_requires_both_to_pass() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_minute: 60,
            burst_size: 1,
        });
        limiter.check("key-a", "1.2.3.4").await.unwrap();
        let result = limiter.check("key-a", "9.9.9.9").await;
        assert!(matches!(result, Err(AuthError::RateLimited { .. })));
    }
}
