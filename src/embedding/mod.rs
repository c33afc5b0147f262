use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{Config, EmbeddingStrategy};

/// Model-backed embedding client for a local Ollama runtime.
pub mod ollama;

pub use ollama::OllamaEmbedder;

/// Errors raised by embedding strategies.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The strategy was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// The strategy returned a different number of vectors than inputs.
    #[error("Embedding count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// Number of input texts.
        expected: usize,
        /// Number of vectors returned by the backend.
        actual: usize,
    },
}

/// Interface implemented by embedding strategies.
///
/// One strategy is chosen per vector store instance and must be used for both
/// ingestion and query embedding; the store enforces this through
/// [`fingerprint`](Embedder::fingerprint) at initialization time.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Produce an embedding vector for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationFailed("no vector produced".to_string()))
    }

    /// Produce one embedding vector per supplied text, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Fixed length of every vector this strategy produces.
    fn dimensionality(&self) -> usize;

    /// Stable identifier for the strategy, model, and dimension.
    ///
    /// Two embedders with different fingerprints must never write into the
    /// same vector store; mixing embedding spaces silently corrupts
    /// similarity scores.
    fn fingerprint(&self) -> String;
}

/// Deterministic, dependency-free embedding strategy.
///
/// Projects text into a fixed-dimensional vector using a seeded
/// pseudo-random expansion of the text's SHA-256 digest, then L2-normalizes.
/// Used when the model runtime is unavailable so ingestion and search never
/// hard-fail purely because the model dependency is down, and in offline
/// tests. Vectors from this strategy carry no semantic signal beyond
/// text identity.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Construct a hash embedder producing vectors of the given dimension.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];
        if text.is_empty() {
            return embedding;
        }

        let digest = Sha256::digest(text.as_bytes());
        let mut state = u64::from_le_bytes(digest[..8].try_into().unwrap_or([1; 8])).max(1);

        for value in &mut embedding {
            // xorshift64: cheap, deterministic expansion of the seed
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *value = (state as f32 / u64::MAX as f32) * 2.0 - 1.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }

    fn dimensionality(&self) -> usize {
        self.dimension
    }

    fn fingerprint(&self) -> String {
        format!("hash/xorshift-sha256/{}", self.dimension)
    }
}

/// Build the embedder selected by the configuration.
pub fn build_embedder(config: &Config) -> Box<dyn Embedder> {
    match config.embedding_strategy {
        EmbeddingStrategy::Hash => Box::new(HashEmbedder::new(config.embedding_dimension)),
        EmbeddingStrategy::Ollama => Box::new(OllamaEmbedder::new(
            config.embedding_model.clone(),
            config.embedding_dimension,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("compressor alarm 17").await.unwrap();
        let b = embedder.embed("compressor alarm 17").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn hash_embedder_distinguishes_texts() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("evaporator coil").await.unwrap();
        let b = embedder.embed("condenser fan").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn hash_embedder_vectors_are_unit_length() {
        let embedder = HashEmbedder::new(128);
        let vector = embedder.embed("defrost cycle").await.unwrap();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn batch_matches_single_embedding() {
        let embedder = HashEmbedder::new(32);
        let single = embedder.embed("setpoint drift").await.unwrap();
        let batch = embedder
            .embed_batch(&["setpoint drift".to_string(), "other".to_string()])
            .await
            .unwrap();
        assert_eq!(batch[0], single);
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn rejects_empty_input() {
        let embedder = HashEmbedder::new(32);
        assert!(embedder.embed_batch(&[]).await.is_err());
    }

    #[test]
    fn fingerprint_includes_dimension() {
        let embedder = HashEmbedder::new(384);
        assert!(embedder.fingerprint().ends_with("/384"));
    }
}
