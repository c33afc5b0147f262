//! Shared types used by the vector store trait and its backends.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors returned by vector store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected backend response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Store was initialized with a different embedder than it holds.
    #[error("Embedder mismatch: store holds '{stored}', configured '{configured}'")]
    EmbedderMismatch {
        /// Fingerprint persisted by the store.
        stored: String,
        /// Fingerprint of the embedder being configured now.
        configured: String,
    },
    /// Vector dimensionality does not match the store's configuration.
    #[error("Dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality the store was initialized with.
        expected: usize,
        /// Dimensionality observed in the request.
        actual: usize,
    },
    /// Local snapshot file could not be read or written.
    #[error("Store persistence failed: {0}")]
    Persistence(#[from] std::io::Error),
    /// Snapshot or response payload failed to (de)serialize.
    #[error("Store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Store was used before a successful `initialize` call.
    #[error("Store is not initialized")]
    NotInitialized,
}

impl StoreError {
    /// Whether retrying the operation may succeed.
    ///
    /// Transport failures, server errors, and rate limiting are transient;
    /// everything else is surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(err) => !err.is_builder(),
            Self::UnexpectedStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }
}

/// Durable unit managed by every backend: a chunk with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Deterministic identifier, `"{document_id}:{sequence_index:04}"`.
    pub chunk_id: String,
    /// Document this chunk belongs to.
    pub document_id: String,
    /// Windowed chunk text.
    pub text: String,
    /// Character offset of the window start in the normalized source text.
    pub start_offset: usize,
    /// Character offset one past the window end.
    pub end_offset: usize,
    /// Position of this chunk within the document.
    pub sequence_index: usize,
    /// Coarse page estimate derived from the sequence index.
    pub page_estimate: usize,
    /// Embedding vector produced for the chunk text.
    pub embedding: Vec<f32>,
    /// Filterable metadata (brand, model, tags) inherited from the document.
    pub metadata: BTreeMap<String, String>,
}

/// A record that could not be written, with the reason.
#[derive(Debug)]
pub struct FailedRecord {
    /// Identifier of the record that failed.
    pub chunk_id: String,
    /// Backend error describing the failure.
    pub error: StoreError,
}

/// Outcome of a batch upsert: durable successes plus reported failures.
#[derive(Debug, Default)]
pub struct UpsertOutcome {
    /// Number of records durably written or replaced.
    pub succeeded: usize,
    /// Records that failed after retries, for the caller to log or retry.
    pub failed: Vec<FailedRecord>,
}

/// Scored search hit returned by every backend.
#[derive(Debug, Clone)]
pub struct SearchMatch {
    /// Identifier of the matching chunk.
    pub chunk_id: String,
    /// Document the chunk belongs to.
    pub document_id: String,
    /// Stored chunk text.
    pub text: String,
    /// Coarse page estimate for citation display.
    pub page_estimate: usize,
    /// Stored metadata for the chunk.
    pub metadata: BTreeMap<String, String>,
    /// Normalized similarity in `[0, 1]`, 1 meaning identical.
    pub score: f32,
}

/// Aggregate counts describing a store's contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Total number of chunk records held.
    pub count: usize,
    /// Number of distinct documents represented.
    pub distinct_documents: usize,
}

/// Cosine similarity between two equal-length vectors.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Map a cosine similarity in `[-1, 1]` onto the normalized `[0, 1]` scale
/// shared by every backend.
pub fn normalize_cosine(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.3, -0.2, 0.9];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn normalize_maps_cosine_range_into_unit_interval() {
        assert!((normalize_cosine(1.0) - 1.0).abs() < 1e-6);
        assert!((normalize_cosine(-1.0)).abs() < 1e-6);
        assert!((normalize_cosine(0.0) - 0.5).abs() < 1e-6);
        assert_eq!(normalize_cosine(1.5), 1.0);
    }

    #[test]
    fn transient_classification_covers_server_errors() {
        let err = StoreError::UnexpectedStatus {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert!(err.is_transient());

        let err = StoreError::UnexpectedStatus {
            status: StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(!err.is_transient());

        let err = StoreError::NotInitialized;
        assert!(!err.is_transient());
    }
}
