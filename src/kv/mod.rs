//! Typed wrapper over the remote key/value store.
//!
//! The Cache, Rate Limiter, and Lifecycle Controller depend only on this
//! trait; no component reaches for a concrete backend directly.

pub mod memory;
pub mod redis_client;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::KvError;

/// Operations the cache/lock/rate-limit layers need from the remote store.
/// Any backend meeting this contract is acceptable.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Byte-transparent read. `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;

    /// Unconditional write with a TTL.
    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError>;

    /// Write only if the key is currently absent. Returns `true` if this
    /// call created the key (for locks and rate-limit initialization).
    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, KvError>;

    /// Delete only if the stored value equals `expected` (compare-and-delete,
    /// for releasing a lock you still own). Returns `true` if deleted.
    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, KvError>;

    /// Delete unconditionally.
    async fn delete(&self, key: &str) -> Result<(), KvError>;

    /// Cursor-based enumeration of all keys under `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;

    /// Liveness probe.
    async fn ping(&self) -> Result<(), KvError>;

    /// Read-compute-write refill of a token bucket, atomic with respect to
    /// concurrent callers for the same key. Returns `(tokens_after, allowed)`.
    ///
    /// Implemented as a single scripted transaction on KV backends that
    /// support server-side scripting (e.g. Redis `EVAL`) so steps 1-4 of the
    /// rate limiter's `check_and_consume` operation are indivisible.
    async fn atomic_token_bucket(
        &self,
        key: &str,
        capacity: f64,
        refill_per_second: f64,
        now_epoch_secs: f64,
        ttl: Duration,
    ) -> Result<TokenBucketResult, KvError>;
}

/// Result of an atomic token-bucket check-and-consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketResult {
    pub allowed: bool,
    pub remaining: f64,
    /// Seconds until at least one token is available, set only when denied.
    pub retry_after_secs: f64,
}
