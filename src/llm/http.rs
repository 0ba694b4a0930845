//! HTTP-backed [`LlmClient`] with its own retry-with-backoff, independent of
//! the circuit breaker that wraps it.

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};

pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    max_attempts: u32,
}

impl HttpLlmClient {
    pub fn new(endpoint: String, api_key: Option<SecretString>, timeout: Duration, max_attempts: u32) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            max_attempts: max_attempts.max(1),
        })
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/completions", self.endpoint.trim_end_matches('/'));
        let mut http_request = self.client.post(url).json(&WireRequest::from(request));
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key.expose_secret());
        }

        let response = http_request.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout(Duration::default())
            } else {
                LlmError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::AuthConfigError);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(LlmError::RateLimited { retry_after });
        }

        if status.is_server_error() {
            return Err(LlmError::RequestFailed(format!("status {status}")));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidResponse(format!("status {status}: {body}")));
        }

        let parsed: WireResponse = response.json().await.map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(CompletionResponse {
            completion_text: parsed.completion,
            input_token_count: parsed.input_tokens,
            output_token_count: parsed.output_tokens,
        })
    }
}

/// `base_delay * 2^attempt`, capped, with 25% jitter and a 100ms floor.
fn backoff_delay(attempt: u32) -> Duration {
    let base_ms: u64 = 1000;
    let capped_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt)).min(4000);
    let jitter_range = capped_ms / 4;
    let jitter = if jitter_range > 0 {
        let offset = rand::thread_rng().gen_range(0..=jitter_range * 2);
        offset as i64 - jitter_range as i64
    } else {
        0
    };
    Duration::from_millis((capped_ms as i64 + jitter).max(100) as u64)
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            match self.attempt(&request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    if attempt + 1 == self.max_attempts {
                        last_error = Some(err);
                        break;
                    }
                    let delay = match &err {
                        LlmError::RateLimited { retry_after: Some(d) } => *d,
                        _ => backoff_delay(attempt),
                    };
                    warn!(attempt = attempt + 1, max_attempts = self.max_attempts, error = %err, "retrying LLM call");
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(LlmError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
}

impl<'a> From<&'a CompletionRequest> for WireRequest<'a> {
    fn from(r: &'a CompletionRequest) -> Self {
        Self {
            prompt: &r.prompt,
            model: &r.model,
            temperature: r.temperature,
            max_tokens: r.max_output_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    completion: String,
    input_tokens: u32,
    output_tokens: u32,
}
