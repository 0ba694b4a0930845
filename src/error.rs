//! Error types for the gateway.

use std::time::Duration;

/// Top-level error type for the gateway.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("KV store error: {0}")]
    Kv(#[from] KvError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("shutting down")]
    ShuttingDown,

    #[error("internal error: {0}")]
    Internal(String),
}

/// The taxonomy kind used to map an [`Error`] onto a wire status code.
///
/// Kept distinct from the `Error` enum itself so the HTTP layer can match on
/// kind without caring which subsystem produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    RateLimited,
    DependencyUnavailable,
    LlmUnavailable,
    ShuttingDown,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Unauthenticated => ErrorKind::Unauthenticated,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            Error::ShuttingDown => ErrorKind::ShuttingDown,
            Error::Llm(LlmError::BreakerOpen) | Error::Llm(LlmError::RetriesExhausted { .. }) => {
                ErrorKind::LlmUnavailable
            }
            Error::Kv(_) => ErrorKind::DependencyUnavailable,
            Error::Config(_) | Error::Embedding(_) | Error::Llm(_) | Error::Cache(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Short machine code carried in the structured error body (never the
    /// `Display` text, which may change wording independently).
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::DependencyUnavailable | ErrorKind::LlmUnavailable | ErrorKind::ShuttingDown => {
                "service_unavailable"
            }
            ErrorKind::Internal => "internal_error",
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("failed to parse configuration: {0}")]
    ParseError(String),
}

/// KV store client errors.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("ping failed after retries: {0}")]
    Unreachable(String),
}

/// Embedding producer errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("dimension mismatch: producer returned {actual}, configured {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// LLM producer errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("rate limited by provider, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication with provider failed")]
    AuthConfigError,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("circuit breaker is open")]
    BreakerOpen,

    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl LlmError {
    /// Whether this failure is transient and worth a retry (connection
    /// error, 5xx-equivalent, 429) versus a config problem that should fail
    /// immediately (401/403 -> [`LlmError::AuthConfigError`]).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RequestFailed(_) | LlmError::RateLimited { .. } | LlmError::Timeout(_)
        )
    }
}

/// Cache-layer errors (distinct from the underlying KV transport errors).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("KV store error: {0}")]
    Kv(#[from] KvError),

    #[error("stored entry malformed: {0}")]
    Malformed(String),
}
