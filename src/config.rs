use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the manual knowledge pipeline.
///
/// There is no global configuration singleton: load once with
/// [`Config::from_env`] and pass the relevant values into the pipeline and
/// store constructors explicitly.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Which vector store backend to construct.
    pub store_backend: StoreBackend,
    /// Base URL of the Qdrant instance, required for the remote backend.
    pub qdrant_url: Option<String>,
    /// Name of the Qdrant collection holding manual chunks.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Path of the local store snapshot file, used by the local backend.
    pub local_store_path: String,
    /// Embedding strategy used for both ingestion and query embedding.
    pub embedding_strategy: EmbeddingStrategy,
    /// Embedding model identifier passed to the model-backed strategy.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Window size in characters for the chunker.
    pub chunk_window_size: usize,
    /// Overlap in characters between consecutive chunk windows.
    pub chunk_overlap: usize,
    /// Maximum chunks embedded and upserted per batch.
    pub ingest_batch_size: usize,
    /// Maximum embedding batches in flight for one document.
    pub ingest_max_concurrency: usize,
    /// Base URL of the text-generation endpoint, if generation is enabled.
    pub generation_url: Option<String>,
    /// API key for the text-generation endpoint.
    pub generation_api_key: Option<String>,
    /// Model identifier passed to the text-generation endpoint.
    pub generation_model: String,
    /// Timeout in seconds for a single generation call.
    pub generation_timeout_secs: u64,
    /// Default number of candidates retrieved per query.
    pub search_default_top_k: usize,
    /// Minimum normalized score for a chunk to count as relevant at all.
    pub relevance_floor: f32,
    /// Top score at or above which an answer can be labeled high confidence.
    pub high_confidence_threshold: f32,
    /// Margin over the runner-up required for high confidence.
    pub high_confidence_margin: f32,
    /// Top score at or above which an answer is at least medium confidence.
    pub medium_confidence_threshold: f32,
    /// Character budget for retrieved context in the generation prompt.
    pub prompt_context_budget: usize,
}

/// Supported vector store backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// File-persisted in-process store with no network dependency.
    Local,
    /// Remote managed Qdrant instance over HTTP.
    Qdrant,
}

/// Supported embedding strategies for the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStrategy {
    /// Model-backed embeddings from a local Ollama runtime.
    Ollama,
    /// Deterministic hash-projection fallback, fully offline.
    Hash,
}

impl Config {
    /// Load configuration from environment variables, applying defaults for
    /// tuning knobs and validating the rest.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = Self {
            store_backend: load_env_optional("MANUALKB_STORE_BACKEND")
                .unwrap_or_else(|| "local".to_string())
                .parse()
                .map_err(|()| ConfigError::InvalidValue("MANUALKB_STORE_BACKEND".to_string()))?,
            qdrant_url: load_env_optional("QDRANT_URL"),
            qdrant_collection_name: load_env_optional("QDRANT_COLLECTION_NAME")
                .unwrap_or_else(|| "manual_chunks".to_string()),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            local_store_path: load_env_optional("MANUALKB_LOCAL_STORE_PATH")
                .unwrap_or_else(|| "data/manualkb-store.json".to_string()),
            embedding_strategy: load_env_optional("MANUALKB_EMBEDDING_STRATEGY")
                .unwrap_or_else(|| "hash".to_string())
                .parse()
                .map_err(|()| {
                    ConfigError::InvalidValue("MANUALKB_EMBEDDING_STRATEGY".to_string())
                })?,
            embedding_model: load_env_optional("MANUALKB_EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            embedding_dimension: parse_env("MANUALKB_EMBEDDING_DIMENSION", 384)?,
            chunk_window_size: parse_env("MANUALKB_CHUNK_WINDOW_SIZE", 800)?,
            chunk_overlap: parse_env("MANUALKB_CHUNK_OVERLAP", 150)?,
            ingest_batch_size: parse_env("MANUALKB_INGEST_BATCH_SIZE", 32)?,
            ingest_max_concurrency: parse_env("MANUALKB_INGEST_MAX_CONCURRENCY", 4)?,
            generation_url: load_env_optional("MANUALKB_GENERATION_URL"),
            generation_api_key: load_env_optional("MANUALKB_GENERATION_API_KEY"),
            generation_model: load_env_optional("MANUALKB_GENERATION_MODEL")
                .unwrap_or_else(|| "meta/llama3-8b-instruct".to_string()),
            generation_timeout_secs: parse_env("MANUALKB_GENERATION_TIMEOUT_SECS", 20)?,
            search_default_top_k: parse_env("MANUALKB_SEARCH_TOP_K", 5)?,
            relevance_floor: parse_env("MANUALKB_RELEVANCE_FLOOR", 0.40_f32)?,
            high_confidence_threshold: parse_env("MANUALKB_HIGH_CONFIDENCE_THRESHOLD", 0.82_f32)?,
            high_confidence_margin: parse_env("MANUALKB_HIGH_CONFIDENCE_MARGIN", 0.05_f32)?,
            medium_confidence_threshold: parse_env(
                "MANUALKB_MEDIUM_CONFIDENCE_THRESHOLD",
                0.65_f32,
            )?,
            prompt_context_budget: parse_env("MANUALKB_PROMPT_CONTEXT_BUDGET", 6000)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue(
                "MANUALKB_EMBEDDING_DIMENSION".to_string(),
            ));
        }
        if self.chunk_window_size == 0 || self.chunk_overlap >= self.chunk_window_size {
            return Err(ConfigError::InvalidValue(
                "MANUALKB_CHUNK_OVERLAP".to_string(),
            ));
        }
        if self.store_backend == StoreBackend::Qdrant && self.qdrant_url.is_none() {
            return Err(ConfigError::MissingVariable("QDRANT_URL".to_string()));
        }
        Ok(())
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "qdrant" => Ok(Self::Qdrant),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for EmbeddingStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_parses_known_variants() {
        assert_eq!("local".parse::<StoreBackend>(), Ok(StoreBackend::Local));
        assert_eq!("Qdrant".parse::<StoreBackend>(), Ok(StoreBackend::Qdrant));
        assert!("chroma".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn embedding_strategy_parses_known_variants() {
        assert_eq!(
            "hash".parse::<EmbeddingStrategy>(),
            Ok(EmbeddingStrategy::Hash)
        );
        assert_eq!(
            "OLLAMA".parse::<EmbeddingStrategy>(),
            Ok(EmbeddingStrategy::Ollama)
        );
        assert!("openai".parse::<EmbeddingStrategy>().is_err());
    }
}
