//! Redis-backed [`KvClient`].
//!
//! Uses `ConnectionManager` for automatic reconnection, matching the
//! connection-pooling style the rest of the corpus uses for its remote
//! stores. Atomic operations that plain `GET`/`SET` can't express on their
//! own (set-if-absent-with-TTL, compare-and-delete, token-bucket refill) are
//! implemented as `EVAL` scripts so they execute as a single Redis command.

use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::KvError;
use crate::kv::{KvClient, TokenBucketResult};

/// `SET key value NX PX ttl_ms`, returning whether the key was created.
const SET_IF_ABSENT_SCRIPT: &str = r"
if redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2]) then
  return 1
else
  return 0
end
";

/// Delete KEYS[1] only if its current value equals ARGV[1].
const COMPARE_AND_DELETE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return 1
else
  return 0
end
";

/// Lazy-refill token bucket. KEYS[1] holds `<tokens>:<last_refill_epoch_secs>`.
/// ARGV: capacity, refill_per_second, now_epoch_secs, ttl_ms.
/// Returns `{allowed, tokens_after, retry_after_secs}`.
const TOKEN_BUCKET_SCRIPT: &str = r"
local raw = redis.call('GET', KEYS[1])
local capacity = tonumber(ARGV[1])
local refill_per_second = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local ttl_ms = ARGV[4]

local tokens, last_refill
if raw then
  local sep = string.find(raw, ':')
  tokens = tonumber(string.sub(raw, 1, sep - 1))
  last_refill = tonumber(string.sub(raw, sep + 1))
else
  tokens = capacity
  last_refill = now
end

local elapsed = math.max(0, now - last_refill)
local refilled = math.min(capacity, tokens + elapsed * refill_per_second)

local allowed, tokens_after, retry_after
if refilled >= 1 then
  allowed = 1
  tokens_after = refilled - 1
  retry_after = 0
else
  allowed = 0
  tokens_after = refilled
  retry_after = (1 - refilled) / refill_per_second
end

redis.call('SET', KEYS[1], tostring(tokens_after) .. ':' .. tostring(now), 'PX', ttl_ms)
return {allowed, tostring(tokens_after), tostring(retry_after)}
";

pub struct RedisKvClient {
    conn: ConnectionManager,
}

impl RedisKvClient {
    pub async fn connect(endpoint: &SecretString) -> Result<Self, KvError> {
        let client = redis::Client::open(endpoint.expose_secret())
            .map_err(|e| KvError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvClient for RedisKvClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;
        Ok(value.filter(|v| !v.is_empty()))
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let created: i64 = redis::Script::new(SET_IF_ABSENT_SCRIPT)
            .key(key)
            .arg(value)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;
        Ok(created == 1)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, KvError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = redis::Script::new(COMPARE_AND_DELETE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;
        Ok(deleted == 1)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(|e| KvError::Command(e.to_string()))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        let pattern = format!("{prefix}*");

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| KvError::Command(e.to_string()))?;

            cursor = next_cursor;
            keys.extend(batch);

            if cursor == 0 {
                break;
            }
        }

        debug!(prefix = %prefix, count = keys.len(), "scanned KV keys");
        Ok(keys)
    }

    async fn ping(&self) -> Result<(), KvError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| KvError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn atomic_token_bucket(
        &self,
        key: &str,
        capacity: f64,
        refill_per_second: f64,
        now_epoch_secs: f64,
        ttl: Duration,
    ) -> Result<TokenBucketResult, KvError> {
        let mut conn = self.conn.clone();
        let (allowed, tokens_after, retry_after): (i64, String, String) =
            redis::Script::new(TOKEN_BUCKET_SCRIPT)
                .key(key)
                .arg(capacity)
                .arg(refill_per_second)
                .arg(now_epoch_secs)
                .arg(ttl.as_millis() as u64)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| KvError::Command(e.to_string()))?;

        Ok(TokenBucketResult {
            allowed: allowed == 1,
            remaining: tokens_after.parse().unwrap_or(0.0),
            retry_after_secs: retry_after.parse().unwrap_or(0.0),
        })
    }
}
