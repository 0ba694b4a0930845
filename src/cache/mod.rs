//! Cache-layer semantics atop the KV store: fingerprint keying, response +
//! embedding co-storage, exact lookup, linear semantic scan, and the
//! single-flight lock primitives the Orchestrator coordinates through.

pub mod fingerprint;
pub mod similarity;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::embedding;
use crate::error::CacheError;
use crate::kv::KvClient;

pub use fingerprint::fingerprint;
pub use similarity::cosine_similarity;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    prompt: String,
    response: String,
}

#[derive(Debug, Clone)]
pub struct ExactMatch {
    pub response: String,
    pub prompt: String,
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone)]
pub struct SemanticMatch {
    pub fingerprint: String,
    pub response: String,
    pub prompt: String,
    pub similarity: f64,
}

/// Best-effort in-process counters surfaced by `internal_metrics_summary`;
/// they reset on restart and are never authoritative state.
#[derive(Default)]
pub struct CacheCounters {
    pub exact_hits: AtomicU64,
    pub semantic_hits: AtomicU64,
    pub misses: AtomicU64,
    /// Count of `set` calls this process has made. An estimate, not an exact
    /// live count: it never decrements on TTL expiry and counts overwrites
    /// of an existing fingerprint as new items.
    pub stored_item_estimate: AtomicU64,
}

pub struct Cache {
    kv: Arc<dyn KvClient>,
    key_prefix: String,
    lock_prefix: String,
    pub counters: CacheCounters,
}

impl Cache {
    pub fn new(kv: Arc<dyn KvClient>, key_prefix: String, lock_prefix: String) -> Self {
        Self {
            kv,
            key_prefix,
            lock_prefix,
            counters: CacheCounters::default(),
        }
    }

    fn record_key(&self, fp: &str) -> String {
        format!("{}:{}", self.key_prefix, fp)
    }

    fn embedding_key(&self, fp: &str) -> String {
        format!("{}:{}:embedding", self.key_prefix, fp)
    }

    fn lock_key(&self, fp: &str) -> String {
        format!("{}:{}", self.lock_prefix, fp)
    }

    pub async fn get_exact(&self, fp: &str) -> Result<Option<ExactMatch>, CacheError> {
        let Some(raw) = self.kv.get(&self.record_key(fp)).await? else {
            return Ok(None);
        };
        let record: StoredRecord = serde_json::from_slice(&raw).map_err(|e| CacheError::Malformed(e.to_string()))?;

        let embedding = match self.kv.get(&self.embedding_key(fp)).await? {
            Some(bytes) => match embedding::deserialize(&bytes) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(fingerprint = %fp, error = %e, "stored embedding malformed, treating as absent");
                    None
                }
            },
            None => None,
        };

        Ok(Some(ExactMatch {
            response: record.response,
            prompt: record.prompt,
            embedding,
        }))
    }

    /// Linear scan of every entry under the configured prefix. Acceptable
    /// only while the stored count stays modest; an ANN index would replace
    /// this for larger corpora without changing the caller-facing contract.
    async fn scan_all(&self) -> Result<Vec<(String, StoredRecord, Option<Vec<f32>>)>, CacheError> {
        let prefix = format!("{}:", self.key_prefix);
        let keys = self.kv.scan_prefix(&prefix).await?;

        let mut entries = Vec::new();
        for key in keys {
            if key.ends_with(":embedding") {
                continue;
            }
            let Some(fp) = key.strip_prefix(&prefix) else { continue };
            let Some(raw) = self.kv.get(&key).await? else { continue };
            let record: StoredRecord = match serde_json::from_slice(&raw) {
                Ok(r) => r,
                Err(e) => {
                    warn!(fingerprint = %fp, error = %e, "skipping malformed cache record during scan");
                    continue;
                }
            };
            let embedding = match self.kv.get(&self.embedding_key(fp)).await? {
                Some(bytes) => embedding::deserialize(&bytes).ok(),
                None => None,
            };
            entries.push((fp.to_string(), record, embedding));
        }
        Ok(entries)
    }

    /// Best-scoring entry at or above `threshold`; ties broken by scan order.
    /// Entries whose stored embedding dimension differs from the query's are
    /// skipped (producer-version skew).
    pub async fn find_semantic_match(&self, query_embedding: &[f32], threshold: f64) -> Result<Option<SemanticMatch>, CacheError> {
        let entries = self.scan_all().await?;

        let mut best: Option<SemanticMatch> = None;
        for (fp, record, embedding) in entries {
            let Some(stored) = embedding else { continue };
            if stored.len() != query_embedding.len() {
                continue;
            }
            let similarity = cosine_similarity(query_embedding, &stored);
            if similarity < threshold {
                continue;
            }
            let better = match &best {
                Some(b) => similarity > b.similarity,
                None => true,
            };
            if better {
                best = Some(SemanticMatch {
                    fingerprint: fp,
                    response: record.response,
                    prompt: record.prompt,
                    similarity,
                });
            }
        }
        Ok(best)
    }

    /// Two writes under the same TTL; if only one succeeds, the response
    /// write wins so the entry still serves exact hits without an embedding.
    pub async fn set(&self, fp: &str, prompt: &str, response: &str, embedding: Option<&[u8]>, ttl: Duration) -> Result<(), CacheError> {
        let record = StoredRecord {
            prompt: prompt.to_string(),
            response: response.to_string(),
        };
        let bytes = serde_json::to_vec(&record).map_err(|e| CacheError::Malformed(e.to_string()))?;
        self.kv.set_with_ttl(&self.record_key(fp), &bytes, ttl).await?;
        if let Some(embedding) = embedding {
            self.kv.set_with_ttl(&self.embedding_key(fp), embedding, ttl).await?;
        }
        self.counters.stored_item_estimate.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn try_acquire_lock(&self, fp: &str, holder_id: &str, ttl: Duration) -> Result<bool, CacheError> {
        Ok(self.kv.set_if_absent(&self.lock_key(fp), holder_id.as_bytes(), ttl).await?)
    }

    pub async fn release_lock(&self, fp: &str, holder_id: &str) -> Result<bool, CacheError> {
        Ok(self.kv.compare_and_delete(&self.lock_key(fp), holder_id.as_bytes()).await?)
    }

    pub fn record_exact_hit(&self) {
        self.counters.exact_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_semantic_hit(&self) {
        self.counters.semantic_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
    }
}
