//! Integration-level scenarios exercising the Orchestrator through its real
//! component wiring, not the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;

use semcache_gateway::cache::Cache;
use semcache_gateway::config::LlmConfig;
use semcache_gateway::embedding::memory::FixedEmbeddingClient;
use semcache_gateway::kv::memory::InMemoryKv;
use semcache_gateway::llm::breaker::CircuitBreaker;
use semcache_gateway::llm::memory::ScriptedLlmClient;
use semcache_gateway::metrics::Metrics;
use semcache_gateway::orchestrator::{Orchestrator, QueryRequest};

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

fn request(prompt: &str) -> QueryRequest {
    QueryRequest {
        prompt: prompt.to_string(),
        model: None,
        temperature: 0.7,
        max_output_tokens: 500,
        similarity_threshold: 0.75,
    }
}

/// Scenario 4: N concurrent requests with an identical fingerprint on a cold
/// cache trigger exactly one LLM invocation; every caller still gets the
/// same response text.
#[tokio::test]
async fn concurrent_duplicate_requests_invoke_llm_once() {
    let kv = Arc::new(InMemoryKv::new());
    let cache = Arc::new(Cache::new(kv.clone(), "semcache".to_string(), "semcache:lock".to_string()));
    let embedding_client = Arc::new(FixedEmbeddingClient::new(3));
    let llm = Arc::new(ScriptedLlmClient::succeeding("python is a language"));
    let breaker = Arc::new(CircuitBreaker::new(ProxyLlm(llm.clone()), 5, Duration::from_secs(60)));

    let orchestrator = Arc::new(Orchestrator::new(
        cache,
        embedding_client,
        breaker,
        &llm_config(),
        Duration::from_secs(3600),
        Duration::from_secs(30),
        Arc::new(Metrics::new()),
    ));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move { orchestrator.handle(request("what is python")).await }));
    }

    let mut responses = Vec::new();
    for handle in handles {
        if let Ok(response) = handle.await.unwrap() {
            responses.push(response);
        }
    }

    assert_eq!(responses.len(), 10, "every concurrent caller should receive a successful response");
    for response in &responses {
        assert_eq!(response.response, "python is a language");
    }
    assert_eq!(llm.call_count(), 1, "single-flight should collapse concurrent duplicates into one LLM call");
}

/// Scenario 6: requests admitted before shutdown complete and their cache
/// writes are visible; requests arriving after the shutdown flag is set are
/// rejected immediately.
#[tokio::test]
async fn shutdown_drain_waits_for_in_flight_then_rejects_new_admissions() {
    use semcache_gateway::error::Error;
    use semcache_gateway::lifecycle::Lifecycle;

    let lifecycle = Arc::new(Lifecycle::new(Duration::from_secs(2)));
    let guard = lifecycle.admit().unwrap();

    let drain_lifecycle = lifecycle.clone();
    let drain_handle = tokio::spawn(async move { drain_lifecycle.drain().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(matches!(lifecycle.admit(), Err(Error::ShuttingDown)));

    drop(guard);
    tokio::time::timeout(Duration::from_secs(2), drain_handle).await.unwrap().unwrap();
    assert_eq!(lifecycle.in_flight_count(), 0);
}

/// Thin wrapper so the same `Arc<ScriptedLlmClient>` can be shared between
/// the breaker and the assertion on call count.
struct ProxyLlm(Arc<ScriptedLlmClient>);

#[async_trait::async_trait]
impl semcache_gateway::llm::LlmClient for ProxyLlm {
    async fn complete(&self, request: semcache_gateway::llm::CompletionRequest) -> Result<semcache_gateway::llm::CompletionResponse, semcache_gateway::error::LlmError> {
        self.0.complete(request).await
    }
}
