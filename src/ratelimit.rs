//! Token-bucket rate limiting, one bucket per credential, backed by the KV
//! store's atomic refill script so concurrent callers for the same
//! credential never race on a read-compute-write.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::RateLimitConfig;
use crate::error::Error;
use crate::kv::KvClient;

pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: f64,
    pub remaining: f64,
    pub retry_after: Duration,
    /// Unix epoch seconds at which the bucket is expected to hold a full
    /// token again (or, if already full, the current time).
    pub reset_at: u64,
}

pub struct RateLimiter {
    kv: Arc<dyn KvClient>,
    prefix: String,
    capacity: f64,
    refill_per_second: f64,
    bucket_ttl: Duration,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvClient>, prefix: String, config: &RateLimitConfig) -> Self {
        Self {
            kv,
            prefix,
            capacity: config.capacity as f64,
            refill_per_second: config.refill_per_second(),
            bucket_ttl: Duration::from_secs(config.window_seconds.max(1) * 2),
        }
    }

    /// Checks and, if admitted, consumes one token. Never errors on denial —
    /// the caller needs the full [`RateLimitResult`] (not just an `Err`) to
    /// populate rate-limit headers on a rejected response too.
    pub async fn check_and_consume(&self, credential: &str) -> Result<RateLimitResult, Error> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64();
        let key = format!("{}:{}", self.prefix, credential);

        let result = self
            .kv
            .atomic_token_bucket(&key, self.capacity, self.refill_per_second, now, self.bucket_ttl)
            .await?;

        let retry_after_secs = result.retry_after_secs.max(0.0);
        let reset_at = (now + retry_after_secs).round().max(0.0) as u64;

        Ok(RateLimitResult {
            allowed: result.allowed,
            limit: self.capacity,
            remaining: result.remaining,
            retry_after: Duration::from_secs_f64(retry_after_secs),
            reset_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKv;

    fn limiter(capacity: u32, window_seconds: u64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(InMemoryKv::new()),
            "semcache:rl".to_string(),
            &RateLimitConfig { capacity, window_seconds },
        )
    }

    #[tokio::test]
    async fn admits_within_capacity() {
        let limiter = limiter(2, 60);
        assert!(limiter.check_and_consume("cred-a").await.unwrap().allowed);
        assert!(limiter.check_and_consume("cred-a").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn denies_once_bucket_is_empty() {
        let limiter = limiter(1, 60);
        assert!(limiter.check_and_consume("cred-a").await.unwrap().allowed);
        let result = limiter.check_and_consume("cred-a").await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.limit, 1.0);
    }

    #[tokio::test]
    async fn zero_capacity_always_denies() {
        let limiter = limiter(0, 60);
        assert!(!limiter.check_and_consume("cred-a").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn buckets_are_independent_per_credential() {
        let limiter = limiter(1, 60);
        assert!(limiter.check_and_consume("cred-a").await.unwrap().allowed);
        assert!(limiter.check_and_consume("cred-b").await.unwrap().allowed);
    }
}
