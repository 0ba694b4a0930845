//! Router assembly and request handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tracing::error;

use crate::auth::{Authenticator, Role};
use crate::cache::Cache;
use crate::error::{Error, ErrorKind};
use crate::http::types::{ErrorBody, HealthResponse, InternalMetricsSummary, QueryResultWire, SubmitQueryWire};
use crate::kv::KvClient;
use crate::lifecycle::Lifecycle;
use crate::llm::breaker::GuardedLlmClient;
use crate::metrics::Metrics;
use crate::orchestrator::Orchestrator;
use crate::ratelimit::{RateLimitResult, RateLimiter};

pub struct GatewayState {
    pub authenticator: Authenticator,
    pub rate_limiter: RateLimiter,
    pub orchestrator: Orchestrator,
    pub lifecycle: Arc<Lifecycle>,
    pub metrics: Arc<Metrics>,
    pub cache: Arc<Cache>,
    pub kv: Arc<dyn KvClient>,
    pub breaker: Arc<dyn GuardedLlmClient>,
    pub similarity_threshold_default: f64,
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/v1/query", axum::routing::post(submit_query_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/internal/metrics", get(internal_metrics_handler))
        .with_state(state)
}

fn credential_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn error_response(err: &Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::DependencyUnavailable | ErrorKind::LlmUnavailable | ErrorKind::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => {
            error!(error = %err, "internal error");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ErrorBody::from(err))).into_response()
}

async fn submit_query_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap, body: Result<Json<SubmitQueryWire>, axum::extract::rejection::JsonRejection>) -> Response {
    let start = Instant::now();
    let endpoint = "submit_query";

    let guard = match state.lifecycle.admit() {
        Ok(guard) => guard,
        Err(e) => {
            state.metrics.record_request(endpoint, e.code(), start.elapsed().as_secs_f64());
            return error_response(&e);
        }
    };

    let (outcome, rate_limit) = handle_submit_query(&state, headers, body).await;
    drop(guard);

    let status_label = match &outcome {
        Ok(_) => "200",
        Err(e) => e.code(),
    };
    state.metrics.record_request(endpoint, status_label, start.elapsed().as_secs_f64());
    state.metrics.set_in_flight(state.lifecycle.in_flight_count());
    state.metrics.set_breaker_state(state.breaker.is_open(), state.breaker.is_half_open());

    let mut response = match outcome {
        Ok(response) => (StatusCode::OK, Json(QueryResultWire::from(response))).into_response(),
        Err(e) => error_response(&e),
    };
    if let Some(rate_limit) = rate_limit {
        insert_rate_limit_headers(&mut response, &rate_limit);
    }
    response
}

fn insert_rate_limit_headers(response: &mut Response, result: &RateLimitResult) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from_str(&format!("{}", result.limit as i64)).unwrap());
    headers.insert("x-ratelimit-remaining", HeaderValue::from_str(&format!("{}", result.remaining.max(0.0) as i64)).unwrap());
    headers.insert("x-ratelimit-reset", HeaderValue::from_str(&result.reset_at.to_string()).unwrap());
}

/// Returns the orchestrator outcome alongside the rate-limit result (if the
/// rate limiter ran) so the caller can attach headers to every response,
/// success or rejection, per the gateway's rate-limit contract.
async fn handle_submit_query(
    state: &GatewayState,
    headers: HeaderMap,
    body: Result<Json<SubmitQueryWire>, axum::extract::rejection::JsonRejection>,
) -> (Result<crate::orchestrator::QueryResponse, Error>, Option<RateLimitResult>) {
    let credential = credential_header(&headers, state.authenticator.header_name()).map(str::to_string);
    if let Err(e) = state.authenticator.authenticate(credential.as_deref()) {
        return (Err(e), None);
    }

    let credential = credential.expect("authenticate succeeded only with Some(credential)");
    let rate_limit = match state.rate_limiter.check_and_consume(&credential).await {
        Ok(result) => result,
        Err(e) => return (Err(e), None),
    };
    if !rate_limit.allowed {
        let retry_after = rate_limit.retry_after;
        return (Err(Error::RateLimited { retry_after }), Some(rate_limit));
    }

    let result = async {
        let Json(wire) = body.map_err(|e| Error::Validation(e.to_string()))?;
        let request = wire.into_request(state.similarity_threshold_default)?;
        state.orchestrator.handle(request).await
    }
    .await;

    (result, Some(rate_limit))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match state.kv.ping().await {
        Ok(()) => (StatusCode::OK, Json(HealthResponse { status: "healthy" })).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, Json(HealthResponse { status: "unhealthy" })).into_response(),
    }
}

async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> Response {
    (StatusCode::OK, state.metrics.render()).into_response()
}

async fn internal_metrics_handler(State(state): State<Arc<GatewayState>>, headers: HeaderMap) -> Response {
    let credential = credential_header(&headers, state.authenticator.header_name());
    match state.authenticator.authenticate(credential) {
        Ok(Role::Admin) => {}
        Ok(Role::User) => return error_response(&Error::Unauthenticated),
        Err(e) => return error_response(&e),
    }

    let summary = InternalMetricsSummary {
        exact_hits: state.cache.counters.exact_hits.load(std::sync::atomic::Ordering::Relaxed),
        semantic_hits: state.cache.counters.semantic_hits.load(std::sync::atomic::Ordering::Relaxed),
        misses: state.cache.counters.misses.load(std::sync::atomic::Ordering::Relaxed),
        stored_item_estimate: state.cache.counters.stored_item_estimate.load(std::sync::atomic::Ordering::Relaxed),
        in_flight_requests: state.lifecycle.in_flight_count(),
        breaker_open: state.breaker.is_open(),
    };
    (StatusCode::OK, Json(summary)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::{AuthConfig, LlmConfig, RateLimitConfig};
    use crate::embedding::memory::FixedEmbeddingClient;
    use crate::kv::memory::InMemoryKv;
    use crate::llm::breaker::CircuitBreaker;
    use crate::llm::memory::ScriptedLlmClient;
    use axum::body::Body;
    use axum::http::Request;
    use rust_decimal_macros::dec;
    use secrecy::SecretString;
    use std::time::Duration;
    use tower::ServiceExt;

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

    fn test_state() -> Arc<GatewayState> {
        let kv: Arc<dyn KvClient> = Arc::new(InMemoryKv::new());
        let cache = Arc::new(Cache::new(kv.clone(), "semcache".to_string(), "semcache:lock".to_string()));
        let embedding_client = Arc::new(FixedEmbeddingClient::new(3));
        let breaker = Arc::new(CircuitBreaker::new(ScriptedLlmClient::succeeding("answer"), 5, Duration::from_secs(60)));
        let orchestrator = Orchestrator::new(cache.clone(), embedding_client, breaker.clone(), &llm_config(), Duration::from_secs(3600), Duration::from_secs(30), Arc::new(Metrics::new()));

        let auth_config = AuthConfig {
            credential_header_name: "x-api-key".to_string(),
            admin_credentials: vec![SecretString::from("admin-secret".to_string())],
            user_credentials: vec![SecretString::from("user-secret".to_string())],
        };

        Arc::new(GatewayState {
            authenticator: Authenticator::new(&auth_config),
            rate_limiter: RateLimiter::new(kv.clone(), "semcache:rl".to_string(), &RateLimitConfig { capacity: 100, window_seconds: 60 }),
            orchestrator,
            lifecycle: Arc::new(Lifecycle::new(Duration::from_secs(10))),
            metrics: Arc::new(Metrics::new()),
            cache,
            kv,
            breaker,
            similarity_threshold_default: 0.75,
        })
    }

    #[tokio::test]
    async fn health_reports_healthy_when_kv_reachable() {
        let app = build_router(test_state());
        let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_query_without_credential_is_unauthorized() {
        let app = build_router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/v1/query")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"prompt":"hi"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn submit_query_with_valid_credential_succeeds() {
        let app = build_router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/v1/query")
            .header("content-type", "application/json")
            .header("x-api-key", "user-secret")
            .body(Body::from(r#"{"prompt":"what is python"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_query_rejects_oversized_prompt() {
        let app = build_router(test_state());
        let oversized = "a".repeat(2049);
        let request = Request::builder()
            .method("POST")
            .uri("/v1/query")
            .header("content-type", "application/json")
            .header("x-api-key", "user-secret")
            .body(Body::from(serde_json::json!({ "prompt": oversized }).to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn internal_metrics_requires_admin_role() {
        let app = build_router(test_state());
        let request = Request::builder()
            .uri("/internal/metrics")
            .header("x-api-key", "user-secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn internal_metrics_admin_succeeds() {
        let app = build_router(test_state());
        let request = Request::builder()
            .uri("/internal/metrics")
            .header("x-api-key", "admin-secret")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_query_success_carries_rate_limit_headers() {
        let app = build_router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/v1/query")
            .header("content-type", "application/json")
            .header("x-api-key", "user-secret")
            .body(Body::from(r#"{"prompt":"what is python"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-ratelimit-limit"));
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    #[tokio::test]
    async fn submit_query_rejection_still_carries_rate_limit_headers() {
        let state = test_state();
        let app = build_router(state.clone());
        for _ in 0..100 {
            let request = Request::builder()
                .method("POST")
                .uri("/v1/query")
                .header("content-type", "application/json")
                .header("x-api-key", "user-secret")
                .body(Body::from(r#"{"prompt":"what is python"}"#))
                .unwrap();
            app.clone().oneshot(request).await.unwrap();
        }

        let request = Request::builder()
            .method("POST")
            .uri("/v1/query")
            .header("content-type", "application/json")
            .header("x-api-key", "user-secret")
            .body(Body::from(r#"{"prompt":"one too many"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("x-ratelimit-limit"));
        assert!(response.headers().contains_key("x-ratelimit-remaining"));
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }
}
