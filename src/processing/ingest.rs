//! Ingestion pipeline: normalize, chunk, embed, and store one document.

use futures_util::{StreamExt, stream};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::metrics::PipelineMetrics;
use crate::store::{ChunkRecord, VectorStore};

use super::chunking::{chunk_id, page_estimate, split_text};
use super::normalize::normalize_text;
use super::sanitize::to_metadata_map;
use super::types::{DocumentMetadata, IngestError, IngestReport};

/// Fraction of expected chunk ids that must already exist for the
/// idempotency pre-check to short-circuit a document.
const SKIP_FRACTION: f64 = 0.9;

/// Tuning knobs for the ingestion pipeline.
#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    /// Window size in characters.
    pub window_size: usize,
    /// Overlap in characters between consecutive windows.
    pub overlap: usize,
    /// Maximum chunks embedded and upserted per batch.
    pub batch_size: usize,
    /// Maximum embedding batches in flight for one document.
    pub max_concurrency: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            window_size: 800,
            overlap: 150,
            batch_size: 32,
            max_concurrency: 4,
        }
    }
}

impl IngestOptions {
    /// Derive options from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_size: config.chunk_window_size,
            overlap: config.chunk_overlap,
            batch_size: config.ingest_batch_size.max(1),
            max_concurrency: config.ingest_max_concurrency.max(1),
        }
    }
}

/// Orchestrates chunking, embedding, and storage for whole documents.
///
/// Independent documents may be ingested fully in parallel; the store handle
/// is the only shared resource and is safe for concurrent use. Within one
/// document, embedding batches run under a bounded worker pool so a large
/// manual cannot overwhelm the embedding backend or memory.
pub struct IngestionPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    metrics: Arc<PipelineMetrics>,
    options: IngestOptions,
}

struct PendingChunk {
    chunk_id: String,
    text: String,
    start_offset: usize,
    end_offset: usize,
    sequence_index: usize,
}

impl IngestionPipeline {
    /// Build a pipeline over explicit store and embedder handles.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        metrics: Arc<PipelineMetrics>,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            metrics,
            options,
        }
    }

    /// Ingest one document, skipping it when it is already indexed.
    ///
    /// Per-chunk failures are logged and counted but never abort the
    /// document; a manual with one bad page is still far more useful
    /// partially indexed than not indexed at all.
    pub async fn ingest(
        &self,
        document_id: &str,
        raw_text: &str,
        metadata: DocumentMetadata,
    ) -> Result<IngestReport, IngestError> {
        self.ingest_inner(document_id, raw_text, metadata, true)
            .await
    }

    /// Re-process a document from scratch.
    ///
    /// Deletes every existing chunk for the document first, so the store
    /// never holds a mix of old and new chunk generations.
    pub async fn reingest(
        &self,
        document_id: &str,
        raw_text: &str,
        metadata: DocumentMetadata,
    ) -> Result<IngestReport, IngestError> {
        tracing::info!(document_id, "Re-ingesting document");
        self.store.delete_by_document(document_id).await?;
        self.ingest_inner(document_id, raw_text, metadata, false)
            .await
    }

    async fn ingest_inner(
        &self,
        document_id: &str,
        raw_text: &str,
        metadata: DocumentMetadata,
        check_existing: bool,
    ) -> Result<IngestReport, IngestError> {
        let text = normalize_text(raw_text);
        if text.is_empty() {
            return Err(IngestError::EmptyDocument(document_id.to_string()));
        }

        let windows = split_text(&text, self.options.window_size, self.options.overlap)?;
        let expected_ids: Vec<String> = (0..windows.len())
            .map(|index| chunk_id(document_id, index))
            .collect();

        // Cheap existence check before the expensive embedding work.
        if check_existing && !expected_ids.is_empty() {
            let existing = self.store.existing_ids(&expected_ids).await?;
            let threshold = (expected_ids.len() as f64 * SKIP_FRACTION).ceil() as usize;
            if existing.len() >= threshold {
                tracing::info!(
                    document_id,
                    existing = existing.len(),
                    expected = expected_ids.len(),
                    "Document already indexed; skipping"
                );
                self.metrics.record_skip();
                return Ok(IngestReport {
                    chunks_attempted: expected_ids.len(),
                    chunks_stored: 0,
                    chunks_failed: 0,
                    skipped: true,
                });
            }
        }

        let metadata_map = to_metadata_map(metadata);
        let pending: Vec<PendingChunk> = windows
            .into_iter()
            .enumerate()
            .map(|(index, window)| PendingChunk {
                chunk_id: chunk_id(document_id, index),
                text: window.text,
                start_offset: window.start_offset,
                end_offset: window.end_offset,
                sequence_index: index,
            })
            .collect();
        let attempted = pending.len();
        tracing::info!(
            document_id,
            characters = text.chars().count(),
            chunks = attempted,
            "Processing document"
        );

        let batches: Vec<Vec<PendingChunk>> = {
            let mut batches = Vec::new();
            let mut iter = pending.into_iter().peekable();
            while iter.peek().is_some() {
                batches.push(iter.by_ref().take(self.options.batch_size).collect());
            }
            batches
        };

        let results: Vec<(usize, usize)> = stream::iter(batches)
            .map(|batch| self.process_batch(document_id, batch, &metadata_map))
            .buffer_unordered(self.options.max_concurrency)
            .collect()
            .await;

        let (stored, failed) = results
            .into_iter()
            .fold((0, 0), |(stored, failed), (s, f)| (stored + s, failed + f));

        self.metrics.record_ingestion(stored as u64, failed as u64);
        tracing::info!(
            document_id,
            attempted,
            stored,
            failed,
            "Document ingestion finished"
        );

        Ok(IngestReport {
            chunks_attempted: attempted,
            chunks_stored: stored,
            chunks_failed: failed,
            skipped: false,
        })
    }

    /// Embed and upsert one batch, returning `(stored, failed)` counts.
    async fn process_batch(
        &self,
        document_id: &str,
        batch: Vec<PendingChunk>,
        metadata: &BTreeMap<String, String>,
    ) -> (usize, usize) {
        let batch_len = batch.len();
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();

        let vectors = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == batch_len => vectors,
            Ok(vectors) => {
                tracing::warn!(
                    document_id,
                    expected = batch_len,
                    actual = vectors.len(),
                    "Embedder returned wrong vector count; batch dropped"
                );
                return (0, batch_len);
            }
            Err(error) => {
                tracing::warn!(
                    document_id,
                    chunks = batch_len,
                    error = %error,
                    "Embedding failed for batch"
                );
                return (0, batch_len);
            }
        };

        let records: Vec<ChunkRecord> = batch
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| ChunkRecord {
                chunk_id: chunk.chunk_id,
                document_id: document_id.to_string(),
                text: chunk.text,
                start_offset: chunk.start_offset,
                end_offset: chunk.end_offset,
                sequence_index: chunk.sequence_index,
                page_estimate: page_estimate(chunk.sequence_index),
                embedding,
                metadata: metadata.clone(),
            })
            .collect();

        match self.store.upsert(records).await {
            Ok(outcome) => {
                for failure in &outcome.failed {
                    tracing::warn!(
                        document_id,
                        chunk_id = %failure.chunk_id,
                        error = %failure.error,
                        "Chunk rejected by store"
                    );
                }
                (outcome.succeeded, outcome.failed.len())
            }
            Err(error) => {
                tracing::warn!(
                    document_id,
                    chunks = batch_len,
                    error = %error,
                    "Store upsert failed for batch"
                );
                (0, batch_len)
            }
        }
    }
}
