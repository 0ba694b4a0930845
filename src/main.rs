use std::sync::Arc;

use secrecy::ExposeSecret;
use tracing_subscriber::EnvFilter;

use semcache_gateway::auth::Authenticator;
use semcache_gateway::cache::Cache;
use semcache_gateway::config::Config;
use semcache_gateway::embedding::http::HttpEmbeddingClient;
use semcache_gateway::http::{build_router, GatewayState};
use semcache_gateway::kv::redis_client::RedisKvClient;
use semcache_gateway::kv::KvClient;
use semcache_gateway::lifecycle::{wait_for_shutdown_signal, Lifecycle};
use semcache_gateway::llm::breaker::{CircuitBreaker, GuardedLlmClient};
use semcache_gateway::llm::http::HttpLlmClient;
use semcache_gateway::metrics::Metrics;
use semcache_gateway::orchestrator::Orchestrator;
use semcache_gateway::ratelimit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.http.log_filter.clone()))
        .json()
        .init();

    tracing::info!(bind_addr = %config.http.bind_addr, "starting semcache-gateway");

    let kv: Arc<dyn KvClient> = Arc::new(RedisKvClient::connect(&config.kv.endpoint).await?);
    Lifecycle::probe_startup(kv.as_ref()).await?;

    let cache = Arc::new(Cache::new(kv.clone(), config.kv.key_prefix.clone(), config.kv.lock_prefix.clone()));

    let embedding_client = Arc::new(HttpEmbeddingClient::new(
        config.embedding.endpoint.clone(),
        config.embedding.api_key.as_ref().map(|s| s.expose_secret().to_string().into()),
        config.embedding.dim,
        config.embedding.timeout,
    )?);

    let llm_client = HttpLlmClient::new(
        config.llm.endpoint.clone(),
        config.llm.api_key.as_ref().map(|s| s.expose_secret().to_string().into()),
        config.llm.timeout,
        config.llm.max_attempts,
    )?;
    let breaker: Arc<dyn GuardedLlmClient> = Arc::new(CircuitBreaker::new(llm_client, config.breaker.failure_threshold, config.breaker.cooldown));

    let metrics = Arc::new(Metrics::new());
    let lifecycle = Arc::new(Lifecycle::new(config.lifecycle.shutdown_drain));

    let orchestrator = Orchestrator::new(
        cache.clone(),
        embedding_client,
        breaker.clone(),
        &config.llm,
        config.cache.response_ttl,
        config.cache.lock_ttl,
        metrics.clone(),
    );

    let state = Arc::new(GatewayState {
        authenticator: Authenticator::new(&config.auth),
        rate_limiter: RateLimiter::new(kv.clone(), config.kv.rate_limit_prefix.clone(), &config.rate_limit),
        orchestrator,
        lifecycle: lifecycle.clone(),
        metrics,
        cache,
        kv,
        breaker,
        similarity_threshold_default: config.similarity_threshold_default,
    });

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.http.bind_addr).await?;
    tracing::info!(bind_addr = %config.http.bind_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_shutdown_signal().await;
            lifecycle.drain().await;
        })
        .await?;

    Ok(())
}
