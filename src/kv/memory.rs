//! In-memory [`KvClient`] fake used by component and orchestrator tests so
//! they never touch a real network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::KvError;
use crate::kv::{KvClient, TokenBucketResult};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

pub struct InMemoryKv {
    store: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
        }
    }

    fn read(&self, key: &str) -> Option<Vec<u8>> {
        let mut store = self.store.lock().unwrap();
        match store.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                store.remove(key);
                None
            }
            None => None,
        }
    }
}

impl Default for InMemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvClient for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        Ok(self.read(key))
    }

    async fn set_with_ttl(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        self.store.lock().unwrap().insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, KvError> {
        if self.read(key).is_some() {
            return Ok(false);
        }
        self.set_with_ttl(key, value, ttl).await?;
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, KvError> {
        let mut store = self.store.lock().unwrap();
        let matches = matches!(store.get(key), Some(e) if e.value == expected);
        if matches {
            store.remove(key);
        }
        Ok(matches)
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        self.store.lock().unwrap().remove(key);
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let now = Instant::now();
        let store = self.store.lock().unwrap();
        Ok(store
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && e.expires_at > now)
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn ping(&self) -> Result<(), KvError> {
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
        let mut store = self.store.lock().unwrap();
        let (tokens, last_refill) = match store.get(key) {
            Some(e) if e.expires_at > Instant::now() => {
                let raw = String::from_utf8_lossy(&e.value);
                let mut parts = raw.splitn(2, ':');
                let tokens: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(capacity);
                let last_refill: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(now_epoch_secs);
                (tokens, last_refill)
            }
            _ => (capacity, now_epoch_secs),
        };

        let elapsed = (now_epoch_secs - last_refill).max(0.0);
        let refilled = (tokens + elapsed * refill_per_second).min(capacity);

        let result = if refilled >= 1.0 {
            TokenBucketResult {
                allowed: true,
                remaining: refilled - 1.0,
                retry_after_secs: 0.0,
            }
        } else {
            TokenBucketResult {
                allowed: false,
                remaining: refilled,
                retry_after_secs: (1.0 - refilled) / refill_per_second,
            }
        };

        store.insert(
            key.to_string(),
            Entry {
                value: format!("{}:{}", result.remaining, now_epoch_secs).into_bytes(),
                expires_at: Instant::now() + ttl,
            },
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_if_absent_succeeds_once() {
        let kv = InMemoryKv::new();
        assert!(kv.set_if_absent("k", b"v1", Duration::from_secs(10)).await.unwrap());
        assert!(!kv.set_if_absent("k", b"v2", Duration::from_secs(10)).await.unwrap());
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn compare_and_delete_only_matching_owner() {
        let kv = InMemoryKv::new();
        kv.set_with_ttl("lock", b"holder-a", Duration::from_secs(10)).await.unwrap();
        assert!(!kv.compare_and_delete("lock", b"holder-b").await.unwrap());
        assert!(kv.compare_and_delete("lock", b"holder-a").await.unwrap());
        assert_eq!(kv.get("lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn token_bucket_denies_when_empty() {
        let kv = InMemoryKv::new();
        let r1 = kv
            .atomic_token_bucket("rl:u1", 1.0, 1.0, 1000.0, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(r1.allowed);
        let r2 = kv
            .atomic_token_bucket("rl:u1", 1.0, 1.0, 1000.0, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!r2.allowed);
    }

    #[tokio::test]
    async fn scan_prefix_returns_matching_keys_only() {
        let kv = InMemoryKv::new();
        kv.set_with_ttl("semcache:a", b"1", Duration::from_secs(10)).await.unwrap();
        kv.set_with_ttl("semcache:b", b"2", Duration::from_secs(10)).await.unwrap();
        kv.set_with_ttl("other:c", b"3", Duration::from_secs(10)).await.unwrap();
        let mut keys = kv.scan_prefix("semcache:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["semcache:a".to_string(), "semcache:b".to_string()]);
    }
}
