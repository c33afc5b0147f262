//! Model-backed embedding strategy using a local Ollama runtime.

use async_trait::async_trait;
use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use super::{Embedder, EmbeddingError};

/// Embedder that delegates to an Ollama feature-extraction model.
pub struct OllamaEmbedder {
    client: Ollama,
    model: String,
    dimension: usize,
}

impl OllamaEmbedder {
    /// Construct an embedder against the default local Ollama endpoint.
    pub fn new(model: String, dimension: usize) -> Self {
        Self {
            client: Ollama::default(),
            model,
            dimension,
        }
    }

    /// Construct an embedder against an explicit Ollama host and port.
    pub fn with_host(host: impl Into<String>, port: u16, model: String, dimension: usize) -> Self {
        Self {
            client: Ollama::new(host.into(), port),
            model,
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Err(EmbeddingError::GenerationFailed(
                "no texts provided".to_string(),
            ));
        }

        tracing::debug!(
            model = %self.model,
            count = texts.len(),
            "Requesting embeddings from Ollama"
        );

        let request = GenerateEmbeddingsRequest::new(
            self.model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|err| EmbeddingError::GenerationFailed(err.to_string()))?;

        if response.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: response.embeddings.len(),
            });
        }

        for vector in &response.embeddings {
            if vector.len() != self.dimension {
                return Err(EmbeddingError::GenerationFailed(format!(
                    "model '{}' produced {}-dimensional vectors, expected {}",
                    self.model,
                    vector.len(),
                    self.dimension
                )));
            }
        }

        Ok(response.embeddings)
    }

    fn dimensionality(&self) -> usize {
        self.dimension
    }

    fn fingerprint(&self) -> String {
        format!("ollama/{}/{}", self.model, self.dimension)
    }
}
