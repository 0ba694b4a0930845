//! Circuit breaker wrapping the LLM Client: CLOSED / OPEN / HALF_OPEN, with
//! per-process state protected by a single mutex — no cluster-wide breaker
//! coordination is required.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient};

/// Object-safe façade over a breaker-wrapped client so the Orchestrator can
/// hold one without naming the concrete [`LlmClient`] type parameter.
#[async_trait]
pub trait GuardedLlmClient: Send + Sync {
    async fn call(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
    fn is_open(&self) -> bool;
    /// `true` only while half-open, distinct from `is_open` for the
    /// breaker_state gauge's three-way reading.
    fn is_half_open(&self) -> bool;
}

#[async_trait]
impl<C: LlmClient> GuardedLlmClient for CircuitBreaker<C> {
    async fn call(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        CircuitBreaker::call(self, request).await
    }

    fn is_open(&self) -> bool {
        CircuitBreaker::is_open(self)
    }

    fn is_half_open(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, BreakerState::HalfOpen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

pub struct CircuitBreaker<C> {
    client: C,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl<C: LlmClient> CircuitBreaker<C> {
    pub fn new(client: C, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            client,
            failure_threshold,
            cooldown,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
            }),
        }
    }

    /// `true` if the gauge exposed in metrics should read "open" (1) rather
    /// than "closed"/"half-open" (0). Half-open counts as closed for the
    /// gauge: it is actively probing, not refusing traffic.
    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, BreakerState::Open)
    }

    /// Evaluates OPEN -> HALF_OPEN eligibility and either admits the call or
    /// fails fast with [`LlmError::BreakerOpen`].
    fn admit(&self) -> Result<(), LlmError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(()),
            BreakerState::Open => {
                let elapsed_ok = match inner.last_failure_at {
                    Some(t) => t.elapsed() >= self.cooldown,
                    None => false,
                };
                if elapsed_ok {
                    inner.state = BreakerState::HalfOpen;
                    info!("circuit breaker entering half-open");
                    Ok(())
                } else {
                    Err(LlmError::BreakerOpen)
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != BreakerState::Closed {
            info!(from = ?inner.state, "circuit breaker closing after success");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_failure_at = Some(Instant::now());
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                warn!("circuit breaker reopening after half-open probe failure");
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    warn!(
                        consecutive_failures = inner.consecutive_failures,
                        "circuit breaker opening"
                    );
                }
            }
            BreakerState::Open => {}
        }
    }

    pub async fn call(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.admit()?;
        match self.client.complete(request).await {
            Ok(response) => {
                self.record_success();
                Ok(response)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }
}
