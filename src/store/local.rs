//! File-persisted in-process vector store.
//!
//! Holds all records in memory in insertion order (which makes score
//! tie-breaking deterministic) and persists a JSON snapshot after every
//! mutation so the system is fully testable and usable offline. The snapshot
//! carries the embedder fingerprint so a mismatched embedder is rejected at
//! initialization instead of silently corrupting similarity scores.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::{
    ChunkRecord, SearchMatch, StoreError, StoreStats, UpsertOutcome, cosine_similarity,
    normalize_cosine,
};
use super::{FailedRecord, VectorStore};

/// Zero-network vector store backed by a flat JSON snapshot file.
pub struct LocalStore {
    path: PathBuf,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    header: Option<Header>,
    records: Vec<ChunkRecord>,
    index: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Header {
    dimension: usize,
    embedder_fingerprint: String,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    embedder_fingerprint: String,
    records: Vec<ChunkRecord>,
}

impl LocalStore {
    /// Create a store handle over the given snapshot path.
    ///
    /// Nothing is read until [`VectorStore::initialize`] is called.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            inner: RwLock::new(Inner::default()),
        }
    }

    fn load_snapshot(path: &Path) -> Result<Option<Snapshot>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        Ok(Some(snapshot))
    }

    fn persist(&self, inner: &Inner) -> Result<(), StoreError> {
        let header = inner.header.as_ref().ok_or(StoreError::NotInitialized)?;
        let snapshot = Snapshot {
            dimension: header.dimension,
            embedder_fingerprint: header.embedder_fingerprint.clone(),
            records: inner.records.clone(),
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        // Temp-file-then-rename keeps the snapshot readable if we crash mid-write.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for LocalStore {
    async fn initialize(
        &self,
        dimension: usize,
        embedder_fingerprint: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(header) = &inner.header {
            if header.embedder_fingerprint != embedder_fingerprint {
                return Err(StoreError::EmbedderMismatch {
                    stored: header.embedder_fingerprint.clone(),
                    configured: embedder_fingerprint.to_string(),
                });
            }
            if header.dimension != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: header.dimension,
                    actual: dimension,
                });
            }
            return Ok(());
        }

        match Self::load_snapshot(&self.path)? {
            Some(snapshot) => {
                if snapshot.embedder_fingerprint != embedder_fingerprint {
                    return Err(StoreError::EmbedderMismatch {
                        stored: snapshot.embedder_fingerprint,
                        configured: embedder_fingerprint.to_string(),
                    });
                }
                if snapshot.dimension != dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: snapshot.dimension,
                        actual: dimension,
                    });
                }
                tracing::debug!(
                    path = %self.path.display(),
                    records = snapshot.records.len(),
                    "Loaded local store snapshot"
                );
                inner.index = snapshot
                    .records
                    .iter()
                    .enumerate()
                    .map(|(position, record)| (record.chunk_id.clone(), position))
                    .collect();
                inner.records = snapshot.records;
                inner.header = Some(Header {
                    dimension: snapshot.dimension,
                    embedder_fingerprint: snapshot.embedder_fingerprint,
                });
            }
            None => {
                inner.header = Some(Header {
                    dimension,
                    embedder_fingerprint: embedder_fingerprint.to_string(),
                });
                self.persist(&inner)?;
                tracing::debug!(path = %self.path.display(), "Created empty local store");
            }
        }
        Ok(())
    }

    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<UpsertOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        let dimension = inner
            .header
            .as_ref()
            .ok_or(StoreError::NotInitialized)?
            .dimension;

        let mut outcome = UpsertOutcome::default();
        for record in records {
            if record.embedding.len() != dimension {
                outcome.failed.push(FailedRecord {
                    chunk_id: record.chunk_id.clone(),
                    error: StoreError::DimensionMismatch {
                        expected: dimension,
                        actual: record.embedding.len(),
                    },
                });
                continue;
            }
            match inner.index.get(&record.chunk_id).copied() {
                // Replace in place; the record keeps its insertion position.
                Some(position) => inner.records[position] = record,
                None => {
                    let position = inner.records.len();
                    inner.index.insert(record.chunk_id.clone(), position);
                    inner.records.push(record);
                }
            }
            outcome.succeeded += 1;
        }

        self.persist(inner)?;
        Ok(outcome)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        let inner = self.inner.read().await;
        if inner.header.is_none() {
            return Err(StoreError::NotInitialized);
        }
        Ok(ids
            .iter()
            .filter(|id| inner.index.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &BTreeMap<String, String>,
    ) -> Result<Vec<SearchMatch>, StoreError> {
        let inner = self.inner.read().await;
        let dimension = inner
            .header
            .as_ref()
            .ok_or(StoreError::NotInitialized)?
            .dimension;
        if query.len() != dimension {
            return Err(StoreError::DimensionMismatch {
                expected: dimension,
                actual: query.len(),
            });
        }

        let mut matches: Vec<SearchMatch> = inner
            .records
            .iter()
            .filter(|record| {
                filter
                    .iter()
                    .all(|(key, value)| record.metadata.get(key) == Some(value))
            })
            .map(|record| SearchMatch {
                chunk_id: record.chunk_id.clone(),
                document_id: record.document_id.clone(),
                text: record.text.clone(),
                page_estimate: record.page_estimate,
                metadata: record.metadata.clone(),
                score: normalize_cosine(cosine_similarity(query, &record.embedding)),
            })
            .collect();

        // Stable sort over the insertion-ordered record list keeps ties
        // deterministic.
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if inner.header.is_none() {
            return Err(StoreError::NotInitialized);
        }
        let before = inner.records.len();
        inner
            .records
            .retain(|record| record.document_id != document_id);
        inner.index = inner
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.chunk_id.clone(), position))
            .collect();
        let removed = before - inner.records.len();
        if removed > 0 {
            self.persist(inner)?;
        }
        tracing::debug!(document_id, removed, "Deleted document chunks");
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.read().await;
        if inner.header.is_none() {
            return Err(StoreError::NotInitialized);
        }
        let documents: HashSet<&str> = inner
            .records
            .iter()
            .map(|record| record.document_id.as_str())
            .collect();
        Ok(StoreStats {
            count: inner.records.len(),
            distinct_documents: documents.len(),
        })
    }
}
