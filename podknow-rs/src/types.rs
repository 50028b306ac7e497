//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::clustering::DistanceMetric;
use crate::errors::{PodknowError, Result};

/// Where clustering runs for an episode processed by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeMode {
    /// Cluster each episode's units on its own during STORE.
    Episode,
    /// Skip per-episode clustering; the caller runs corpus-wide clustering.
    Corpus,
}

impl std::str::FromStr for ScopeMode {
    type Err = PodknowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "episode" => Ok(ScopeMode::Episode),
            "corpus" => Ok(ScopeMode::Corpus),
            other => Err(PodknowError::Config(format!(
                "PODKNOW_CLUSTER_SCOPE must be `episode` or `corpus`, got `{other}`"
            ))),
        }
    }
}

/// Tuning knobs for the semantic pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PipelineConfig {
    /// Lifetime of cached conversation structures, in minutes.
    #[validate(range(min = 1))]
    pub cache_ttl_minutes: u64,

    /// Maximum number of cached conversation structures.
    #[validate(range(min = 1))]
    pub cache_capacity: u64,

    /// In-flight extraction requests per episode.
    #[validate(range(min = 1))]
    pub max_parallel_units: usize,

    /// Episodes processed concurrently by [`crate::pipeline::PipelineOrchestrator::process_episodes`].
    #[validate(range(min = 1))]
    pub max_parallel_episodes: usize,

    /// Minimum normalized string similarity for merging entity mentions.
    #[validate(range(min = 0.0, max = 1.0))]
    pub similarity_threshold: f64,

    #[validate(range(min = 2))]
    pub min_cluster_size: usize,

    #[validate(range(min = 1))]
    pub min_samples: usize,

    /// Candidate clusters born below this distance merge into their parent.
    #[validate(range(min = 0.0))]
    pub merge_epsilon: f64,

    pub distance_metric: DistanceMetric,

    /// Members nearest the centroid whose summaries feed the label prompt.
    #[validate(range(min = 1))]
    pub label_sample_size: usize,

    pub cluster_scope: ScopeMode,

    /// Token-bucket burst size for model calls.
    #[validate(range(min = 1))]
    pub rate_limit_burst: u32,

    /// Token-bucket refill rate (calls per second).
    #[validate(range(min = 0.001))]
    pub rate_limit_per_second: f64,

    /// Delay before the single retry of a failed model call.
    pub retry_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: 60,
            cache_capacity: 1_000,
            max_parallel_units: 4,
            max_parallel_episodes: 2,
            similarity_threshold: 0.85,
            min_cluster_size: 5,
            min_samples: 3,
            merge_epsilon: 0.0,
            distance_metric: DistanceMetric::Cosine,
            label_sample_size: 5,
            cluster_scope: ScopeMode::Episode,
            rate_limit_burst: 10,
            rate_limit_per_second: 5.0,
            retry_backoff_ms: 500,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `PODKNOW_*` environment variables.
    ///
    /// Calls `dotenvy::dotenv().ok()` first (non-fatal if `.env` is absent).
    /// Unset variables keep their defaults; unparseable or out-of-range values
    /// return [`PodknowError::Config`] naming the offending variable.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            cache_ttl_minutes: env_parse("PODKNOW_CACHE_TTL_MINUTES", defaults.cache_ttl_minutes)?,
            cache_capacity: env_parse("PODKNOW_CACHE_CAPACITY", defaults.cache_capacity)?,
            max_parallel_units: env_parse("PODKNOW_MAX_PARALLEL_UNITS", defaults.max_parallel_units)?,
            max_parallel_episodes: env_parse(
                "PODKNOW_MAX_PARALLEL_EPISODES",
                defaults.max_parallel_episodes,
            )?,
            similarity_threshold: env_parse(
                "PODKNOW_SIMILARITY_THRESHOLD",
                defaults.similarity_threshold,
            )?,
            min_cluster_size: env_parse("PODKNOW_MIN_CLUSTER_SIZE", defaults.min_cluster_size)?,
            min_samples: env_parse("PODKNOW_MIN_SAMPLES", defaults.min_samples)?,
            merge_epsilon: env_parse("PODKNOW_MERGE_EPSILON", defaults.merge_epsilon)?,
            distance_metric: env_parse("PODKNOW_DISTANCE_METRIC", defaults.distance_metric)?,
            label_sample_size: env_parse("PODKNOW_LABEL_SAMPLE_SIZE", defaults.label_sample_size)?,
            cluster_scope: env_parse("PODKNOW_CLUSTER_SCOPE", defaults.cluster_scope)?,
            rate_limit_burst: env_parse("PODKNOW_RATE_LIMIT_BURST", defaults.rate_limit_burst)?,
            rate_limit_per_second: env_parse(
                "PODKNOW_RATE_LIMIT_PER_SECOND",
                defaults.rate_limit_per_second,
            )?,
            retry_backoff_ms: env_parse("PODKNOW_RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?,
        };

        config.ensure_valid()?;
        Ok(config)
    }

    /// Range-check every field, mapping violations to [`PodknowError::Config`].
    pub fn ensure_valid(&self) -> Result<()> {
        self.validate()
            .map_err(|e| PodknowError::Config(e.to_string()))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_minutes * 60)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Credentials and model names for the OpenAI-compatible provider adapter.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderConfig {
    #[validate(length(min = 1))]
    pub api_key: String,

    /// Optional base URL for OpenAI-compatible gateways.
    pub api_base: Option<String>,

    #[validate(length(min = 1))]
    pub model_name: String,

    #[validate(length(min = 1))]
    pub embedding_model: String,
}

impl ProviderConfig {
    /// Load from `OPENAI_API_KEY`, `OPENAI_API_BASE`, `PODKNOW_MODEL` and
    /// `PODKNOW_EMBEDDING_MODEL`. The API key is required.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PodknowError::Config("OPENAI_API_KEY is required".to_string()))?;

        let config = Self {
            api_key,
            api_base: std::env::var("OPENAI_API_BASE").ok(),
            model_name: std::env::var("PODKNOW_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            embedding_model: std::env::var("PODKNOW_EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
        };

        config
            .validate()
            .map_err(|e| PodknowError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| PodknowError::Config(format!("{name}: {e}"))),
        Err(_) => Ok(default),
    }
}
