use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    documents_skipped: AtomicU64,
    chunks_stored: AtomicU64,
    chunks_failed: AtomicU64,
    queries_answered: AtomicU64,
    queries_degraded: AtomicU64,
    queries_insufficient: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a processed document with its stored and failed chunk counts.
    pub fn record_ingestion(&self, stored: u64, failed: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_stored.fetch_add(stored, Ordering::Relaxed);
        self.chunks_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record a document skipped by the idempotency pre-check.
    pub fn record_skip(&self) {
        self.documents_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query that reached a terminal state.
    pub fn record_query(&self, outcome: QueryOutcome) {
        let counter = match outcome {
            QueryOutcome::Answered => &self.queries_answered,
            QueryOutcome::Degraded => &self.queries_degraded,
            QueryOutcome::Insufficient => &self.queries_insufficient,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            documents_skipped: self.documents_skipped.load(Ordering::Relaxed),
            chunks_stored: self.chunks_stored.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            queries_degraded: self.queries_degraded.load(Ordering::Relaxed),
            queries_insufficient: self.queries_insufficient.load(Ordering::Relaxed),
        }
    }
}

/// Terminal outcome of a single query, used for metrics accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Generation produced a grounded answer.
    Answered,
    /// Generation was unavailable; a verbatim chunk was returned.
    Degraded,
    /// No retrieved chunk cleared the relevance floor.
    Insufficient,
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents fully processed since startup.
    pub documents_ingested: u64,
    /// Documents short-circuited by the idempotency check.
    pub documents_skipped: u64,
    /// Chunks durably written across all documents.
    pub chunks_stored: u64,
    /// Chunks that failed embedding or storage.
    pub chunks_failed: u64,
    /// Queries answered through the generation endpoint.
    pub queries_answered: u64,
    /// Queries that fell back to a verbatim chunk answer.
    pub queries_degraded: u64,
    /// Queries that found no relevant content.
    pub queries_insufficient: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_ingestions_and_skips() {
        let metrics = PipelineMetrics::new();
        metrics.record_ingestion(10, 2);
        metrics.record_ingestion(5, 0);
        metrics.record_skip();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.documents_ingested, 2);
        assert_eq!(snapshot.documents_skipped, 1);
        assert_eq!(snapshot.chunks_stored, 15);
        assert_eq!(snapshot.chunks_failed, 2);
    }

    #[test]
    fn records_query_outcomes_separately() {
        let metrics = PipelineMetrics::new();
        metrics.record_query(QueryOutcome::Answered);
        metrics.record_query(QueryOutcome::Degraded);
        metrics.record_query(QueryOutcome::Degraded);
        metrics.record_query(QueryOutcome::Insufficient);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_answered, 1);
        assert_eq!(snapshot.queries_degraded, 2);
        assert_eq!(snapshot.queries_insufficient, 1);
    }
}
