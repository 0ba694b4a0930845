//! HTTP-backed [`EmbeddingClient`], modeled on the corpus's OpenAI-compatible
//! embeddings adapter: POST `{endpoint}/embeddings`, bearer auth, a single
//! text per call.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::embedding::EmbeddingClient;
use crate::error::EmbeddingError;

pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    dim: usize,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: String, api_key: Option<SecretString>, dim: usize, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            dim,
        })
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.endpoint.trim_end_matches('/'));
        let mut request = self.client.post(url).json(&EmbeddingRequest { input: text });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(Duration::default())
            } else {
                EmbeddingError::RequestFailed(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::InvalidResponse(format!("status {status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".to_string()))?
            .embedding;

        if vector.len() != self.dim {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }

        Ok(vector)
    }
}
