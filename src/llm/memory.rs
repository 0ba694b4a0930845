//! Deterministic fake [`LlmClient`] for orchestrator tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};

pub struct ScriptedLlmClient {
    responses: Mutex<Vec<Result<CompletionResponse, LlmError>>>,
    calls: AtomicU32,
}

impl ScriptedLlmClient {
    /// Responses are consumed in order; a trailing `Ok` repeats once the
    /// list is down to one entry, a trailing `Err` fires once.
    pub fn new(responses: Vec<Result<CompletionResponse, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: AtomicU32::new(0),
        }
    }

    pub fn succeeding(text: &str) -> Self {
        Self::new(vec![Ok(CompletionResponse {
            completion_text: text.to_string(),
            input_token_count: 10,
            output_token_count: 5,
        })])
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            match responses.first() {
                Some(Ok(r)) => Ok(r.clone()),
                Some(Err(_)) => Err(responses.remove(0).unwrap_err()),
                None => Err(LlmError::RequestFailed("no scripted response".to_string())),
            }
        }
    }
}
