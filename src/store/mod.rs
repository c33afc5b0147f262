//! Vector store abstraction and backends.
//!
//! Every backend implements the same [`VectorStore`] contract and passes the
//! same contract test suite; application logic never branches on which
//! backend is active. The local backend needs no network; the Qdrant backend
//! models a remote, rate-limited managed service.

/// File-persisted in-process backend.
pub mod local;
/// Payload construction helpers for the Qdrant backend.
pub mod payload;
/// Remote Qdrant backend over HTTP.
pub mod qdrant;
/// Shared record, result, and error types.
pub mod types;

pub use local::LocalStore;
pub use qdrant::QdrantStore;
pub use types::{
    ChunkRecord, FailedRecord, SearchMatch, StoreError, StoreStats, UpsertOutcome,
    normalize_cosine,
};

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::time::Duration;

/// Storage contract implemented identically by every backend.
///
/// Handles are `Send + Sync` and safe for concurrent use by multiple
/// ingestion and query tasks; share them through an `Arc`.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Prepare the store for the given vector dimensionality and embedder.
    ///
    /// Idempotent; safe to call on every process start. Fails with
    /// [`StoreError::EmbedderMismatch`] when the store already holds vectors
    /// from a different embedding strategy.
    async fn initialize(&self, dimension: usize, embedder_fingerprint: &str)
    -> Result<(), StoreError>;

    /// Insert or replace records keyed by `chunk_id`.
    ///
    /// Atomic at single-record granularity: each record is either durably
    /// written or reported in `failed`; a partial failure never rolls back
    /// the records that succeeded.
    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<UpsertOutcome, StoreError>;

    /// Return the subset of `ids` already present in the store.
    ///
    /// Strongly consistent for the caller's own prior writes.
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError>;

    /// Return at most `top_k` matches ordered by descending normalized score.
    ///
    /// `filter` restricts results to records whose metadata matches every
    /// given key/value pair exactly. Score ties break by insertion order.
    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &BTreeMap<String, String>,
    ) -> Result<Vec<SearchMatch>, StoreError>;

    /// Remove all chunks belonging to a document.
    async fn delete_by_document(&self, document_id: &str) -> Result<(), StoreError>;

    /// Aggregate counts over the store's contents.
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);

/// Run `attempt_fn` with bounded exponential backoff on transient errors.
///
/// Used by networked backends for upsert and search; after the last attempt
/// the error is surfaced to the caller rather than retried further.
pub(crate) async fn with_backoff<T, F, Fut>(
    operation: &str,
    mut attempt_fn: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut delay = BASE_BACKOFF;
    let mut attempt = 1;
    loop {
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    operation,
                    attempt,
                    error = %error,
                    "Transient store error; backing off before retry"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
