//! Wire shapes for the HTTP Gateway: deserialized request, serialized
//! response, and the structured error body.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::orchestrator::{HitType, QueryRequest, QueryResponse};

#[derive(Debug, Deserialize)]
pub struct SubmitQueryWire {
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub similarity_threshold: Option<f64>,
}

impl SubmitQueryWire {
    pub fn into_request(self, similarity_threshold_default: f64) -> Result<QueryRequest, Error> {
        if self.prompt.is_empty() || self.prompt.len() > 2048 {
            return Err(Error::Validation("prompt must be 1 to 2048 bytes".to_string()));
        }
        let temperature = self.temperature.unwrap_or(0.7);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(Error::Validation("temperature must be in [0, 2]".to_string()));
        }
        let similarity_threshold = self.similarity_threshold.unwrap_or(similarity_threshold_default);
        if !(0.0..=1.0).contains(&similarity_threshold) {
            return Err(Error::Validation("similarity_threshold must be in [0, 1]".to_string()));
        }

        Ok(QueryRequest {
            prompt: self.prompt,
            model: self.model,
            temperature,
            max_output_tokens: self.max_output_tokens.unwrap_or(500),
            similarity_threshold,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResultWire {
    pub response: String,
    pub cache_hit: bool,
    pub hit_type: Option<&'static str>,
    pub similarity_score: Option<f64>,
    pub matched_prompt: Option<String>,
    pub tokens_used: u32,
    pub cost: f64,
    pub latency_ms: u64,
}

impl From<QueryResponse> for QueryResultWire {
    fn from(r: QueryResponse) -> Self {
        use rust_decimal::prelude::ToPrimitive;
        Self {
            response: r.response,
            cache_hit: r.cache_hit,
            hit_type: r.hit_type.map(|h| match h {
                HitType::Exact => "exact",
                HitType::Semantic => "semantic",
            }),
            similarity_score: r.similarity_score,
            matched_prompt: r.matched_prompt,
            tokens_used: r.tokens_used,
            cost: r.cost.to_f64().unwrap_or(0.0),
            latency_ms: r.latency_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(e: &Error) -> Self {
        Self { code: e.code(), message: e.to_string() }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct InternalMetricsSummary {
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
    pub stored_item_estimate: u64,
    pub in_flight_requests: i64,
    pub breaker_open: bool,
}
