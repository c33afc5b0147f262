//! Core data types and error definitions for the processing pipeline.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::store::StoreError;

/// Errors produced while splitting text into windows.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Window parameters violate `0 <= overlap < window_size`.
    #[error("invalid window parameters: window_size={window_size}, overlap={overlap}")]
    InvalidWindow {
        /// Requested window size in characters.
        window_size: usize,
        /// Requested overlap in characters.
        overlap: usize,
    },
}

/// Errors emitted by the ingestion pipeline.
///
/// Per-chunk embedding and storage failures are not errors at this level;
/// they are aggregated into [`IngestReport::chunks_failed`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// Document text was empty after normalization; rejected, never retried.
    #[error("document '{0}' contains no extractable text")]
    EmptyDocument(String),
    /// Window configuration was invalid.
    #[error("failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// The store rejected the whole operation (not a per-chunk failure).
    #[error("vector store request failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors emitted before the retrieval stage of a query completes.
///
/// Failures after retrieval (generation errors, timeouts) never surface
/// here; they degrade the answer instead.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Query embedding failed.
    #[error("failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Store search failed after retries.
    #[error("vector store search failed: {0}")]
    Store(#[from] StoreError),
}

/// Optional classification tags registered with a document.
#[derive(Debug, Default, Clone)]
pub struct DocumentMetadata {
    /// Manufacturer of the unit the manual covers.
    pub brand: Option<String>,
    /// Model identifier the manual covers.
    pub model: Option<String>,
    /// Free-form extensible tags, stored lowercase-keyed.
    pub extra: BTreeMap<String, String>,
}

/// Aggregate summary of one document ingestion.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct IngestReport {
    /// Chunks produced from the normalized text.
    pub chunks_attempted: usize,
    /// Chunks durably written to the vector store.
    pub chunks_stored: usize,
    /// Chunks that failed embedding or storage; logged, not fatal.
    pub chunks_failed: usize,
    /// Whether the idempotency pre-check short-circuited the document.
    pub skipped: bool,
}

/// Calibrated trust signal attached to every answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Top match is strong with a clear margin over the runner-up.
    High,
    /// Matches exist but are middling or tightly clustered.
    Medium,
    /// Matches barely clear the relevance floor, or generation degraded.
    Low,
    /// No retrieved chunk cleared the relevance floor.
    None,
}

impl Confidence {
    /// Stable lowercase label for display and serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance for one chunk used in an answer.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    /// Document the cited chunk belongs to.
    pub document_id: String,
    /// Identifier of the cited chunk.
    pub chunk_id: String,
    /// Coarse page estimate for display.
    pub page_estimate: usize,
    /// Normalized similarity score of the chunk for this query.
    pub score: f32,
}

/// Answer assembled for one query; always returned, never an error, once
/// retrieval has completed.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// Generated or degraded answer text.
    pub text: String,
    /// Calibrated confidence label.
    pub confidence: Confidence,
    /// Chunks actually used, most relevant first.
    pub citations: Vec<Citation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_labels_are_lowercase() {
        assert_eq!(Confidence::High.as_str(), "high");
        assert_eq!(Confidence::None.to_string(), "none");
        assert_eq!(
            serde_json::to_string(&Confidence::Medium).unwrap(),
            "\"medium\""
        );
    }
}
