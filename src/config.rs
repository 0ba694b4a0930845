//! Configuration for the gateway, assembled once at startup from the
//! environment. No request handler ever mutates a `Config` value.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Immutable, fully-validated configuration for one process lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub kv: KvConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub lifecycle: LifecycleConfig,
    pub http: HttpConfig,
    pub similarity_threshold_default: f64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Validation happens eagerly: a misconfigured deployment fails before
    /// the Lifecycle Controller probes the KV store, since there is no
    /// point probing dependencies for a configuration the process can't serve.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let similarity_threshold_default = parse_optional_env("SIMILARITY_THRESHOLD_DEFAULT", 0.75)?;
        if !(0.0..=1.0).contains(&similarity_threshold_default) {
            return Err(ConfigError::InvalidValue {
                key: "SIMILARITY_THRESHOLD_DEFAULT".to_string(),
                message: "must be in [0, 1]".to_string(),
            });
        }

        Ok(Self {
            auth: AuthConfig::from_env()?,
            rate_limit: RateLimitConfig::from_env()?,
            kv: KvConfig::from_env()?,
            embedding: EmbeddingConfig::from_env()?,
            llm: LlmConfig::from_env()?,
            breaker: BreakerConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            lifecycle: LifecycleConfig::from_env()?,
            http: HttpConfig::from_env()?,
            similarity_threshold_default,
        })
    }
}

/// Authenticator configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub credential_header_name: String,
    pub admin_credentials: Vec<SecretString>,
    pub user_credentials: Vec<SecretString>,
}

impl AuthConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let credential_header_name =
            parse_optional_env("CREDENTIAL_HEADER_NAME", "x-api-key".to_string())?;

        let admin_credentials = credential_list("ADMIN_CREDENTIALS")?;
        let user_credentials = credential_list("USER_CREDENTIALS")?;

        if admin_credentials.is_empty() && user_credentials.is_empty() {
            return Err(ConfigError::MissingRequired {
                key: "ADMIN_CREDENTIALS / USER_CREDENTIALS".to_string(),
                hint: "at least one credential must be configured".to_string(),
            });
        }

        Ok(Self {
            credential_header_name,
            admin_credentials,
            user_credentials,
        })
    }
}

fn credential_list(key: &str) -> Result<Vec<SecretString>, ConfigError> {
    Ok(optional_env(key)?
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| SecretString::from(s.to_string()))
                .collect()
        })
        .unwrap_or_default())
}

/// Rate Limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub window_seconds: u64,
}

impl RateLimitConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            capacity: parse_optional_env("RATE_LIMIT_CAPACITY", 100)?,
            window_seconds: parse_optional_env("RATE_LIMIT_WINDOW_SECONDS", 60)?,
        })
    }

    /// Constant average refill rate implied by `capacity` over `window_seconds`.
    pub fn refill_per_second(&self) -> f64 {
        self.capacity as f64 / self.window_seconds.max(1) as f64
    }
}

/// KV Client configuration.
#[derive(Debug, Clone)]
pub struct KvConfig {
    pub endpoint: SecretString,
    pub key_prefix: String,
    pub lock_prefix: String,
    pub rate_limit_prefix: String,
}

impl KvConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let endpoint = optional_env("KV_ENDPOINT")?
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "KV_ENDPOINT".to_string(),
                hint: "a redis:// URL for the KV store is required".to_string(),
            })?
            .into();

        let key_prefix = parse_optional_env("KV_KEY_PREFIX", "semcache".to_string())?;

        Ok(Self {
            endpoint,
            lock_prefix: format!("{key_prefix}:lock"),
            rate_limit_prefix: format!("{key_prefix}:rl"),
            key_prefix,
        })
    }
}

/// Embedding Client configuration.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub dim: usize,
    pub timeout: Duration,
}

impl EmbeddingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let endpoint = optional_env("EMBEDDING_ENDPOINT")?.ok_or_else(|| ConfigError::MissingRequired {
            key: "EMBEDDING_ENDPOINT".to_string(),
            hint: "the embedding producer's base URL is required".to_string(),
        })?;
        let dim: usize = parse_optional_env("EMBEDDING_DIM", 384)?;
        if dim == 0 {
            return Err(ConfigError::InvalidValue {
                key: "EMBEDDING_DIM".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(Self {
            endpoint,
            api_key: optional_env("EMBEDDING_API_KEY")?.map(SecretString::from),
            dim,
            timeout: Duration::from_secs(parse_optional_env("EMBEDDING_TIMEOUT_SECONDS", 5)?),
        })
    }
}

/// LLM Client configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub model_default: String,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub input_cost_per_token: rust_decimal::Decimal,
    pub output_cost_per_token: rust_decimal::Decimal,
}

impl LlmConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let endpoint = optional_env("LLM_ENDPOINT")?.ok_or_else(|| ConfigError::MissingRequired {
            key: "LLM_ENDPOINT".to_string(),
            hint: "the LLM producer's base URL is required".to_string(),
        })?;

        Ok(Self {
            endpoint,
            api_key: optional_env("LLM_API_KEY")?.map(SecretString::from),
            model_default: parse_optional_env("LLM_MODEL_DEFAULT", "default-model".to_string())?,
            timeout: Duration::from_secs(parse_optional_env("LLM_TIMEOUT_SECONDS", 30)?),
            max_attempts: parse_optional_env("LLM_MAX_ATTEMPTS", 3)?,
            input_cost_per_token: parse_decimal_env("LLM_INPUT_COST_PER_TOKEN", "0.000001")?,
            output_cost_per_token: parse_decimal_env("LLM_OUTPUT_COST_PER_TOKEN", "0.000002")?,
        })
    }
}

fn parse_decimal_env(key: &str, default: &str) -> Result<rust_decimal::Decimal, ConfigError> {
    let raw = optional_env(key)?.unwrap_or_else(|| default.to_string());
    raw.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("{e}"),
    })
}

/// Circuit Breaker configuration.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl BreakerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            failure_threshold: parse_optional_env("BREAKER_FAILURE_THRESHOLD", 5)?,
            cooldown: Duration::from_secs(parse_optional_env("BREAKER_COOLDOWN_SECONDS", 60)?),
        })
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub response_ttl: Duration,
    pub lock_ttl: Duration,
}

impl CacheConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            response_ttl: Duration::from_secs(parse_optional_env("RESPONSE_TTL_SECONDS", 3600)?),
            lock_ttl: Duration::from_secs(parse_optional_env("LOCK_TTL_SECONDS", 30)?),
        })
    }
}

/// Lifecycle Controller configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub shutdown_drain: Duration,
}

impl LifecycleConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            shutdown_drain: Duration::from_secs(parse_optional_env("SHUTDOWN_DRAIN_SECONDS", 10)?),
        })
    }
}

/// HTTP Gateway configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub log_filter: String,
}

impl HttpConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: parse_optional_env("BIND_ADDR", "0.0.0.0:8080".to_string())?,
            log_filter: parse_optional_env("LOG_FILTER", "info".to_string())?,
        })
    }
}

pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(ConfigError::ParseError(format!("failed to read {key}: {e}"))),
    }
}

pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serializes tests that mutate process-wide environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn optional_env_returns_none_for_missing_var() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::remove_var("_TEST_CFG_MISSING") };
        assert_eq!(optional_env("_TEST_CFG_MISSING").unwrap(), None);
    }

    #[test]
    fn optional_env_treats_empty_as_absent() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::set_var("_TEST_CFG_EMPTY", "") };
        assert_eq!(optional_env("_TEST_CFG_EMPTY").unwrap(), None);
        unsafe { std::env::remove_var("_TEST_CFG_EMPTY") };
    }

    #[test]
    fn parse_optional_env_returns_default_when_missing() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::remove_var("_TEST_CFG_PARSE_MISSING") };
        let result: u64 = parse_optional_env("_TEST_CFG_PARSE_MISSING", 999).unwrap();
        assert_eq!(result, 999);
    }

    #[test]
    fn parse_optional_env_parses_set_value() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::set_var("_TEST_CFG_PARSE_VAL", "42") };
        let result: u64 = parse_optional_env("_TEST_CFG_PARSE_VAL", 0).unwrap();
        assert_eq!(result, 42);
        unsafe { std::env::remove_var("_TEST_CFG_PARSE_VAL") };
    }

    #[test]
    fn parse_optional_env_rejects_invalid_value() {
        let _lock = ENV_LOCK.lock();
        unsafe { std::env::set_var("_TEST_CFG_PARSE_BAD", "not-a-number") };
        let result = parse_optional_env::<u64>("_TEST_CFG_PARSE_BAD", 0);
        assert!(result.is_err());
        unsafe { std::env::remove_var("_TEST_CFG_PARSE_BAD") };
    }

    #[test]
    fn rate_limit_refill_per_second() {
        let cfg = RateLimitConfig {
            capacity: 120,
            window_seconds: 60,
        };
        assert_eq!(cfg.refill_per_second(), 2.0);
    }
}
