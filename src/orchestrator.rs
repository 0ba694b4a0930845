//! Query Orchestrator: the pipeline that ties the Cache, Embedding Client,
//! and breaker-wrapped LLM Client together for a single request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{fingerprint, Cache};
use crate::config::LlmConfig;
use crate::embedding::{self, EmbeddingClient};
use crate::error::{EmbeddingError, Error, LlmError};
use crate::llm::breaker::GuardedLlmClient;
use crate::llm::CompletionRequest;
use crate::metrics::Metrics;

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HitType {
    Exact,
    Semantic,
}

#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub response: String,
    pub cache_hit: bool,
    pub hit_type: Option<HitType>,
    pub similarity_score: Option<f64>,
    pub matched_prompt: Option<String>,
    pub tokens_used: u32,
    pub cost: Decimal,
    pub latency_ms: u64,
}

pub struct Orchestrator {
    cache: Arc<Cache>,
    embedding_client: Arc<dyn EmbeddingClient>,
    llm: Arc<dyn GuardedLlmClient>,
    model_default: String,
    response_ttl: Duration,
    lock_ttl: Duration,
    lock_wait_poll: Duration,
    llm_cost: (Decimal, Decimal),
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        cache: Arc<Cache>,
        embedding_client: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn GuardedLlmClient>,
        llm_config: &LlmConfig,
        response_ttl: Duration,
        lock_ttl: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            cache,
            embedding_client,
            llm,
            model_default: llm_config.model_default.clone(),
            response_ttl,
            lock_ttl,
            lock_wait_poll: Duration::from_millis(100),
            llm_cost: (llm_config.input_cost_per_token, llm_config.output_cost_per_token),
            metrics,
        }
    }

    pub async fn handle(&self, request: QueryRequest) -> Result<QueryResponse, Error> {
        let start = Instant::now();
        let model = request.model.clone().unwrap_or_else(|| self.model_default.clone());
        let fp = fingerprint::fingerprint(&request.prompt, &model);

        if let Some(hit) = self.cache.get_exact(&fp).await? {
            self.cache.record_exact_hit();
            self.metrics.record_cache_outcome("exact");
            return Ok(self.exact_response(hit.response, start));
        }

        let query_embedding = match self.embedding_client.embed(&request.prompt).await {
            Ok(vector) => Some(vector),
            Err(EmbeddingError::DimensionMismatch { expected, actual }) => {
                tracing::error!(expected, actual, "embedding producer dimension mismatch, treating as configuration error");
                return Err(Error::Embedding(EmbeddingError::DimensionMismatch { expected, actual }));
            }
            Err(e) => {
                warn!(error = %e, "embedding call failed, degrading to LLM path without semantic match");
                None
            }
        };

        if let Some(vector) = &query_embedding {
            if let Some(semantic) = self.cache.find_semantic_match(vector, request.similarity_threshold).await? {
                self.cache.record_semantic_hit();
                self.metrics.record_cache_outcome("semantic");
                return Ok(self.semantic_response(semantic.response, semantic.similarity, semantic.prompt, start));
            }
        }

        let holder_id = Uuid::new_v4().to_string();
        let acquired = self.cache.try_acquire_lock(&fp, &holder_id, self.lock_ttl).await?;

        if !acquired {
            return self.wait_path(&fp, &request, &model, query_embedding, start).await;
        }

        let result = self.locked_path(&fp, &request, &model, query_embedding, start).await;
        let _ = self.cache.release_lock(&fp, &holder_id).await;
        result
    }

    /// Re-checks exact and semantic match after acquiring the lock: another
    /// holder may have filled the cache between our first checks and now.
    async fn locked_path(
        &self,
        fp: &str,
        request: &QueryRequest,
        model: &str,
        query_embedding: Option<Vec<f32>>,
        start: Instant,
    ) -> Result<QueryResponse, Error> {
        if let Some(hit) = self.cache.get_exact(fp).await? {
            self.cache.record_exact_hit();
            self.metrics.record_cache_outcome("exact");
            return Ok(self.exact_response(hit.response, start));
        }

        if let Some(vector) = &query_embedding {
            if let Some(semantic) = self.cache.find_semantic_match(vector, request.similarity_threshold).await? {
                self.cache.record_semantic_hit();
                self.metrics.record_cache_outcome("semantic");
                return Ok(self.semantic_response(semantic.response, semantic.similarity, semantic.prompt, start));
            }
        }

        self.call_llm_and_store(fp, request, model, query_embedding, start).await
    }

    /// Lock already held by another holder: poll the cache (not the lock)
    /// until an entry appears or the deadline passes. On timeout, proceed as
    /// if the lock had been acquired and call the LLM directly — trading a
    /// possible duplicate LLM call for availability, since the original
    /// holder may have crashed or be running long.
    async fn wait_path(
        &self,
        fp: &str,
        request: &QueryRequest,
        model: &str,
        query_embedding: Option<Vec<f32>>,
        start: Instant,
    ) -> Result<QueryResponse, Error> {
        let deadline = tokio::time::Instant::now() + self.lock_ttl;

        while tokio::time::Instant::now() < deadline {
            if let Some(hit) = self.cache.get_exact(fp).await? {
                self.cache.record_exact_hit();
                self.metrics.record_cache_outcome("exact");
                return Ok(self.exact_response(hit.response, start));
            }
            tokio::time::sleep(self.lock_wait_poll).await;
        }

        info!(fingerprint = %fp, "lock wait timed out, proceeding without single-flight guarantee");
        self.call_llm_and_store(fp, request, model, query_embedding, start).await
    }

    /// Calls the guarded LLM client and writes the result to cache. Shared by
    /// the locked path (after a fresh double-check) and the lock-wait
    /// timeout path (which skips the double-check, accepting the small race
    /// window in exchange for not blocking the caller indefinitely).
    async fn call_llm_and_store(
        &self,
        fp: &str,
        request: &QueryRequest,
        model: &str,
        query_embedding: Option<Vec<f32>>,
        start: Instant,
    ) -> Result<QueryResponse, Error> {
        let completion_request = CompletionRequest {
            prompt: request.prompt.clone(),
            model: model.to_string(),
            temperature: request.temperature,
            max_output_tokens: request.max_output_tokens,
        };

        match self.llm.call(completion_request).await {
            Ok(completion) => {
                let embedding_bytes = query_embedding.as_deref().map(embedding::serialize);
                self.cache
                    .set(fp, &request.prompt, &completion.completion_text, embedding_bytes.as_deref(), self.response_ttl)
                    .await?;

                self.cache.record_miss();
                self.metrics.record_cache_outcome("miss");
                let cost = completion.cost(self.llm_cost.0, self.llm_cost.1);
                self.metrics.record_llm_usage(completion.input_token_count, completion.output_token_count, cost);

                Ok(QueryResponse {
                    response: completion.completion_text,
                    cache_hit: false,
                    hit_type: None,
                    similarity_score: None,
                    matched_prompt: None,
                    tokens_used: completion.input_token_count + completion.output_token_count,
                    cost,
                    latency_ms: start.elapsed().as_millis() as u64,
                })
            }
            Err(LlmError::BreakerOpen) => Err(Error::DependencyUnavailable("LLM circuit breaker is open".to_string())),
            Err(e) => Err(Error::Llm(e)),
        }
    }

    fn exact_response(&self, response: String, start: Instant) -> QueryResponse {
        QueryResponse {
            response,
            cache_hit: true,
            hit_type: Some(HitType::Exact),
            similarity_score: Some(1.0),
            matched_prompt: None,
            tokens_used: 0,
            cost: Decimal::ZERO,
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn semantic_response(&self, response: String, similarity: f64, matched_prompt: String, start: Instant) -> QueryResponse {
        QueryResponse {
            response,
            cache_hit: true,
            hit_type: Some(HitType::Semantic),
            similarity_score: Some(similarity),
            matched_prompt: Some(matched_prompt),
            tokens_used: 0,
            cost: Decimal::ZERO,
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::embedding::memory::FixedEmbeddingClient;
    use crate::kv::memory::InMemoryKv;
    use crate::llm::breaker::CircuitBreaker;
    use crate::llm::memory::ScriptedLlmClient;
    use rust_decimal_macros::dec;

    fn llm_config() -> LlmConfig {
        LlmConfig {
            endpoint: "http://localhost".to_string(),
            api_key: None,
            model_default: "default-model".to_string(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            input_cost_per_token: dec!(0.000001),
            output_cost_per_token: dec!(0.000002),
        }
    }

    fn orchestrator(llm: ScriptedLlmClient) -> Orchestrator {
        let cache = Arc::new(Cache::new(Arc::new(InMemoryKv::new()), "semcache".to_string(), "semcache:lock".to_string()));
        let embedding_client = Arc::new(FixedEmbeddingClient::new(3));
        let breaker = Arc::new(CircuitBreaker::new(llm, 5, Duration::from_secs(60)));
        Orchestrator::new(cache, embedding_client, breaker, &llm_config(), Duration::from_secs(3600), Duration::from_secs(30), Arc::new(Metrics::new()))
    }

    fn request(prompt: &str) -> QueryRequest {
        QueryRequest {
            prompt: prompt.to_string(),
            model: None,
            temperature: 0.7,
            max_output_tokens: 500,
            similarity_threshold: 0.75,
        }
    }

    #[tokio::test]
    async fn cold_cache_calls_llm_and_stores_entry() {
        let orchestrator = orchestrator(ScriptedLlmClient::succeeding("python is a language"));
        let response = orchestrator.handle(request("what is python")).await.unwrap();
        assert!(!response.cache_hit);
        assert_eq!(response.response, "python is a language");
    }

    #[tokio::test]
    async fn exact_replay_hits_cache_without_new_llm_call() {
        let llm = ScriptedLlmClient::succeeding("python is a language");
        let orchestrator = orchestrator(llm);

        orchestrator.handle(request("what is python")).await.unwrap();
        let second = orchestrator.handle(request("what is python")).await.unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.hit_type, Some(HitType::Exact));
        assert_eq!(second.similarity_score, Some(1.0));
        assert_eq!(second.tokens_used, 0);
        assert_eq!(second.cost, Decimal::ZERO);
    }

    #[tokio::test]
    async fn semantic_match_above_threshold_is_a_hit() {
        let cache = Arc::new(Cache::new(Arc::new(InMemoryKv::new()), "semcache".to_string(), "semcache:lock".to_string()));
        let embedding_client = Arc::new(FixedEmbeddingClient::new(3));
        embedding_client.set("what is python", vec![1.0, 0.0, 0.0]);
        embedding_client.set("explain the python language", vec![0.99, 0.14, 0.0]);

        let breaker = Arc::new(CircuitBreaker::new(ScriptedLlmClient::succeeding("python is a language"), 5, Duration::from_secs(60)));
        let orchestrator = Orchestrator::new(cache, embedding_client, breaker, &llm_config(), Duration::from_secs(3600), Duration::from_secs(30), Arc::new(Metrics::new()));

        orchestrator.handle(request("what is python")).await.unwrap();
        let second = orchestrator
            .handle(QueryRequest {
                similarity_threshold: 0.75,
                ..request("explain the python language")
            })
            .await
            .unwrap();

        assert!(second.cache_hit);
        assert_eq!(second.hit_type, Some(HitType::Semantic));
        assert_eq!(second.matched_prompt, Some("what is python".to_string()));
    }

    #[tokio::test]
    async fn breaker_open_surfaces_dependency_unavailable() {
        let cache = Arc::new(Cache::new(Arc::new(InMemoryKv::new()), "semcache".to_string(), "semcache:lock".to_string()));
        let embedding_client = Arc::new(FixedEmbeddingClient::new(3));
        let breaker = Arc::new(CircuitBreaker::new(
            ScriptedLlmClient::new(vec![Err(LlmError::RequestFailed("boom".to_string()))]),
            1,
            Duration::from_secs(60),
        ));
        let orchestrator = Orchestrator::new(cache, embedding_client, breaker, &llm_config(), Duration::from_secs(3600), Duration::from_secs(30), Arc::new(Metrics::new()));

        assert!(orchestrator.handle(request("p1")).await.is_err());
        match orchestrator.handle(request("p2")).await {
            Err(Error::DependencyUnavailable(_)) => {}
            other => panic!("expected DependencyUnavailable once breaker is open, got {other:?}"),
        }
    }
}
