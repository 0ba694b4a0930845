//! Remote completion call: request/response types, the breaker-wrapped
//! client trait, an HTTP implementation, and the circuit breaker itself.

pub mod breaker;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::LlmError;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub completion_text: String,
    pub input_token_count: u32,
    pub output_token_count: u32,
}

impl CompletionResponse {
    pub fn cost(&self, input_unit_cost: Decimal, output_unit_cost: Decimal) -> Decimal {
        Decimal::from(self.input_token_count) * input_unit_cost + Decimal::from(self.output_token_count) * output_unit_cost
    }
}

/// A single remote completion call. An implementation may retry internally
/// (see [`http::HttpLlmClient`]); circuit-breaking is a separate concern
/// layered on top by [`breaker::CircuitBreaker`], which is what the Query
/// Orchestrator actually holds.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
