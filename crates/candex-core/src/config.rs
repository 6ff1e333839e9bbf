//! Process configuration read from the environment.
//!
//! Each section can be loaded on its own so that commands which only touch
//! the queue do not require database or provider credentials. Loading goes
//! through a lookup function, which keeps tests independent of the process
//! environment.

use std::net::SocketAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_QUEUE: &str = "candidate_jobs";
pub const DEFAULT_COLLECTION: &str = "candidates";
pub const DEFAULT_COHERE_BASE_URL: &str = "https://api.cohere.ai";
pub const DEFAULT_EMBEDDING_MODEL: &str = "embed-multilingual-light-v3.0";
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
pub const DEFAULT_STATUS_PREFIX: &str = "etl";
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Similarity metric of the vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Euclid,
    Dot,
}

impl FromStr for Distance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclid" | "euclidean" => Ok(Self::Euclid),
            "dot" => Ok(Self::Dot),
            other => Err(format!("unsupported distance `{other}` (expected cosine, euclid or dot)")),
        }
    }
}

impl std::fmt::Display for Distance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Cosine => "cosine",
            Self::Euclid => "euclid",
            Self::Dot => "dot",
        })
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn or(&self, var: &'static str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub url: String,
    pub queue: String,
    pub status_prefix: String,
    pub history_limit: usize,
}

impl RedisSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let history_limit = env.parsed("EXECUTION_HISTORY_LIMIT", DEFAULT_HISTORY_LIMIT)?;
        if history_limit == 0 {
            return Err(ConfigError::Invalid {
                var: "EXECUTION_HISTORY_LIMIT",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Self {
            url: env.or("REDIS_URL", DEFAULT_REDIS_URL),
            queue: env.or("REDIS_QUEUE", DEFAULT_QUEUE),
            status_prefix: env.or("STATUS_KEY_PREFIX", DEFAULT_STATUS_PREFIX),
            history_limit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QdrantSettings {
    pub url: String,
    pub api_key: Option<String>,
    pub collection: String,
}

impl QdrantSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        Ok(Self {
            url: env.required("QDRANT_URL")?,
            api_key: env.optional("QDRANT_API_KEY"),
            collection: env.or("QDRANT_COLLECTION", DEFAULT_COLLECTION),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub distance: Distance,
}

impl EmbeddingSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let dimension = env.parsed("EMBEDDING_DIMENSION", DEFAULT_EMBEDDING_DIMENSION)?;
        if dimension == 0 {
            return Err(ConfigError::Invalid {
                var: "EMBEDDING_DIMENSION",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(Self {
            api_key: env.required("COHERE_API_KEY")?,
            base_url: env.or("COHERE_BASE_URL", DEFAULT_COHERE_BASE_URL),
            model: env.or("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            dimension,
            distance: env.parsed("EMBEDDING_DISTANCE", Distance::Cosine)?,
        })
    }
}

/// Backoff settings for calls to volatile external services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

impl RetrySettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env { lookup };
        let defaults = Self::default();
        let settings = Self {
            max_attempts: env.parsed("RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay_ms: env.parsed("RETRY_BASE_DELAY_MS", defaults.base_delay_ms)?,
            max_delay_ms: env.parsed("RETRY_MAX_DELAY_MS", defaults.max_delay_ms)?,
        };
        if settings.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "RETRY_MAX_ATTEMPTS",
                reason: "must be at least 1".into(),
            });
        }
        Ok(settings)
    }
}

/// Full worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub redis: RedisSettings,
    pub qdrant: QdrantSettings,
    pub embedding: EmbeddingSettings,
    pub retry: RetrySettings,
    pub job_max_attempts: u32,
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    /// Load from the process environment, honoring a `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let redis = RedisSettings::from_lookup(&lookup)?;
        let qdrant = QdrantSettings::from_lookup(&lookup)?;
        let embedding = EmbeddingSettings::from_lookup(&lookup)?;
        let retry = RetrySettings::from_lookup(&lookup)?;

        let env = Env { lookup };
        let metrics_addr = match env.optional("METRICS_ADDR") {
            None => None,
            Some(raw) => Some(raw.trim().parse().map_err(|e: std::net::AddrParseError| {
                ConfigError::Invalid {
                    var: "METRICS_ADDR",
                    reason: e.to_string(),
                }
            })?),
        };

        Ok(Self {
            database_url: env.required("DATABASE_URL")?,
            redis,
            qdrant,
            embedding,
            retry,
            job_max_attempts: env.parsed("JOB_MAX_ATTEMPTS", 3)?,
            metrics_addr,
        })
    }
}

/// Read a `.env` file into the process environment if one exists.
pub fn load_dotenv() {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "loaded .env file");
    }
}

/// Hide the password of a connection URL before it is logged.
pub fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    let user = userinfo.split_once(':').map_or(userinfo, |(user, _)| user);
    format!("{}://{user}:***@{}", &url[..scheme_end], &rest[at + 1..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://app:secret@db/candidates"),
        ("QDRANT_URL", "http://qdrant:6334"),
        ("COHERE_API_KEY", "key"),
    ];

    #[test]
    fn defaults_apply_when_optional_vars_absent() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();
        assert_eq!(config.redis.url, DEFAULT_REDIS_URL);
        assert_eq!(config.redis.queue, "candidate_jobs");
        assert_eq!(config.redis.status_prefix, "etl");
        assert_eq!(config.qdrant.collection, "candidates");
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.embedding.distance, Distance::Cosine);
        assert_eq!(config.retry, RetrySettings::default());
        assert_eq!(config.job_max_attempts, 3);
        assert!(config.metrics_addr.is_none());
    }

    #[test]
    fn missing_required_var_fails_fast() {
        let err = Config::from_lookup(lookup(&[("QDRANT_URL", "x"), ("COHERE_API_KEY", "k")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));

        let err = QdrantSettings::from_lookup(lookup(&[])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("QDRANT_URL"));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let err = EmbeddingSettings::from_lookup(lookup(&[("COHERE_API_KEY", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("COHERE_API_KEY"));
    }

    #[test]
    fn invalid_dimension_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("EMBEDDING_DIMENSION", "lots"));
        assert!(matches!(
            Config::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { var: "EMBEDDING_DIMENSION", .. })
        ));

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("EMBEDDING_DIMENSION", "0"));
        assert!(Config::from_lookup(lookup(&pairs)).is_err());
    }

    #[test]
    fn distance_parses_case_insensitively() {
        assert_eq!("Cosine".parse::<Distance>().unwrap(), Distance::Cosine);
        assert_eq!("EUCLIDEAN".parse::<Distance>().unwrap(), Distance::Euclid);
        assert_eq!("dot".parse::<Distance>().unwrap(), Distance::Dot);
        assert!("manhattan".parse::<Distance>().is_err());
    }

    #[test]
    fn retry_requires_at_least_one_attempt() {
        let err = RetrySettings::from_lookup(lookup(&[("RETRY_MAX_ATTEMPTS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RETRY_MAX_ATTEMPTS", .. }));
    }

    #[test]
    fn metrics_addr_is_parsed() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("METRICS_ADDR", "127.0.0.1:9100"));
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.metrics_addr.unwrap().port(), 9100);
    }

    #[test]
    fn redact_url_hides_password() {
        assert_eq!(
            redact_url("postgres://app:secret@db:5432/candidates"),
            "postgres://app:***@db:5432/candidates"
        );
        assert_eq!(redact_url("redis://:pw@cache:6379"), "redis://:***@cache:6379");
        assert_eq!(redact_url("redis://cache:6379"), "redis://cache:6379");
        assert_eq!(redact_url("not a url"), "not a url");
    }
}
