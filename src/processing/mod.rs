//! Document processing pipeline: normalization, chunking, ingestion, and
//! query answering.

/// Retrieval and answer assembly for queries.
pub mod answer;
/// Fixed-window chunking with offset bookkeeping.
pub mod chunking;
/// Document ingestion orchestration.
pub mod ingest;
/// Text normalization applied before chunking.
pub mod normalize;
/// Metadata sanitation helpers.
pub mod sanitize;
/// Shared pipeline types and errors.
pub mod types;

pub use answer::{AnswerOptions, AnswerService};
pub use chunking::{Window, chunk_id, expected_chunk_ids, page_estimate, split_text};
pub use ingest::{IngestOptions, IngestionPipeline};
pub use normalize::normalize_text;
pub use sanitize::{canonical_brand, canonical_model};
pub use types::{
    Answer, Citation, ChunkingError, Confidence, DocumentMetadata, IngestError, IngestReport,
    QueryError,
};
