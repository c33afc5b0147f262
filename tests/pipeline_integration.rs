//! End-to-end pipeline tests: ingestion through query answering over the
//! local backend with the deterministic embedding strategy.

use httpmock::{Method::POST, MockServer};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use manualkb::embedding::{Embedder, HashEmbedder};
use manualkb::generation::HttpGenerationClient;
use manualkb::metrics::PipelineMetrics;
use manualkb::processing::{
    AnswerOptions, AnswerService, Confidence, DocumentMetadata, IngestOptions, IngestionPipeline,
};
use manualkb::store::{LocalStore, VectorStore};

const DIMENSION: usize = 32;

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<LocalStore>,
    embedder: Arc<HashEmbedder>,
    metrics: Arc<PipelineMetrics>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let embedder = Arc::new(HashEmbedder::new(DIMENSION));
        let store = Arc::new(LocalStore::new(dir.path().join("store.json")));
        store
            .initialize(DIMENSION, &embedder.fingerprint())
            .await
            .unwrap();
        Self {
            _dir: dir,
            store,
            embedder,
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    fn pipeline(&self) -> IngestionPipeline {
        IngestionPipeline::new(
            self.store.clone(),
            self.embedder.clone(),
            self.metrics.clone(),
            IngestOptions::default(),
        )
    }

    fn answers(&self, generation_url: Option<String>) -> AnswerService {
        let generation = generation_url.map(|url| {
            Arc::new(
                HttpGenerationClient::new(
                    url,
                    None,
                    "meta/llama3-8b-instruct",
                    Duration::from_secs(5),
                )
                .unwrap(),
            ) as Arc<dyn manualkb::generation::GenerationClient>
        });
        AnswerService::new(
            self.store.clone(),
            self.embedder.clone(),
            generation,
            self.metrics.clone(),
            AnswerOptions::default(),
        )
    }
}

#[tokio::test]
async fn two_thousand_character_manual_lands_as_three_chunks() {
    let fixture = Fixture::new().await;
    let text = "a".repeat(2000);

    let report = fixture
        .pipeline()
        .ingest("manual-1", &text, DocumentMetadata::default())
        .await
        .unwrap();

    assert_eq!(report.chunks_attempted, 3);
    assert_eq!(report.chunks_stored, 3);
    assert_eq!(report.chunks_failed, 0);

    let existing = fixture
        .store
        .existing_ids(&[
            "manual-1:0000".to_string(),
            "manual-1:0001".to_string(),
            "manual-1:0002".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(existing.len(), 3);
}

#[tokio::test]
async fn reingesting_unchanged_document_skips_and_adds_no_duplicates() {
    let fixture = Fixture::new().await;
    let text = "defrost interval troubleshooting guidance ".repeat(60);
    let pipeline = fixture.pipeline();

    let first = pipeline
        .ingest("manual-1", &text, DocumentMetadata::default())
        .await
        .unwrap();
    let stats_after_first = fixture.store.stats().await.unwrap();

    let second = pipeline
        .ingest("manual-1", &text, DocumentMetadata::default())
        .await
        .unwrap();
    let stats_after_second = fixture.store.stats().await.unwrap();

    assert!(!first.skipped);
    assert!(second.skipped);
    assert_eq!(stats_after_first.count, stats_after_second.count);
    assert_eq!(fixture.metrics.snapshot().documents_skipped, 1);
}

#[tokio::test]
async fn metadata_filter_scopes_retrieval_to_one_brand() {
    let fixture = Fixture::new().await;
    let pipeline = fixture.pipeline();
    let shared_text = "alarm 17 indicates low refrigerant pressure in the suction line ";

    pipeline
        .ingest(
            "carrier-manual",
            &shared_text.repeat(20),
            DocumentMetadata {
                brand: Some("carrier".into()),
                model: Some("69nt40".into()),
                extra: BTreeMap::new(),
            },
        )
        .await
        .unwrap();
    pipeline
        .ingest(
            "daikin-manual",
            &shared_text.repeat(20),
            DocumentMetadata {
                brand: Some("daikin".into()),
                ..DocumentMetadata::default()
            },
        )
        .await
        .unwrap();

    let filter = BTreeMap::from([("brand".to_string(), "Carrier".to_string())]);
    let query = fixture.embedder.embed(shared_text).await.unwrap();
    let matches = fixture.store.search(&query, 10, &filter).await.unwrap();
    assert!(!matches.is_empty());
    assert!(matches.iter().all(|hit| hit.document_id == "carrier-manual"));
}

#[tokio::test]
async fn empty_store_query_is_insufficient_and_never_calls_generation() {
    let fixture = Fixture::new().await;
    let server = MockServer::start_async().await;
    let generation = server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [ { "message": { "content": "should not happen" } } ]
            }));
        })
        .await;

    assert_eq!(fixture.store.stats().await.unwrap().count, 0);
    let answer = fixture
        .answers(Some(server.base_url()))
        .query("how do I clear alarm 17", &BTreeMap::new(), None)
        .await
        .unwrap();

    assert_eq!(answer.confidence, Confidence::None);
    assert!(answer.citations.is_empty());
    assert_eq!(generation.hits(), 0);
}

#[tokio::test]
async fn generation_failure_degrades_to_verbatim_chunk() {
    let fixture = Fixture::new().await;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(500).body("backend down");
        })
        .await;

    let chunk_text = "superheat adjustment requires the unit to run for fifteen minutes";
    fixture
        .pipeline()
        .ingest("manual-1", chunk_text, DocumentMetadata::default())
        .await
        .unwrap();

    // Querying with the chunk's own text makes it the top match by identity.
    let answer = fixture
        .answers(Some(server.base_url()))
        .query(chunk_text, &BTreeMap::new(), None)
        .await
        .unwrap();

    assert_eq!(answer.confidence, Confidence::Low);
    assert_eq!(answer.text, chunk_text);
    assert!(!answer.citations.is_empty());
    assert_eq!(answer.citations[0].document_id, "manual-1");
    assert_eq!(fixture.metrics.snapshot().queries_degraded, 1);
}

#[tokio::test]
async fn successful_generation_returns_grounded_answer_with_citations() {
    let fixture = Fixture::new().await;
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "content": "Run the unit for fifteen minutes first." } }
                ]
            }));
        })
        .await;

    let chunk_text = "superheat adjustment requires the unit to run for fifteen minutes";
    fixture
        .pipeline()
        .ingest("manual-1", chunk_text, DocumentMetadata::default())
        .await
        .unwrap();

    let answer = fixture
        .answers(Some(server.base_url()))
        .query(chunk_text, &BTreeMap::new(), None)
        .await
        .unwrap();

    assert_eq!(answer.text, "Run the unit for fifteen minutes first.");
    assert_eq!(answer.confidence, Confidence::High);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(fixture.metrics.snapshot().queries_answered, 1);
}

#[tokio::test]
async fn search_rankings_are_deterministic_across_runs() {
    let fixture = Fixture::new().await;
    let pipeline = fixture.pipeline();
    for (document, text) in [
        ("m1", "evaporator coil icing and airflow restrictions "),
        ("m2", "compressor discharge pressure out of range "),
        ("m3", "controller firmware update procedure "),
    ] {
        pipeline
            .ingest(document, &text.repeat(25), DocumentMetadata::default())
            .await
            .unwrap();
    }

    let query = fixture.embedder.embed("coil icing").await.unwrap();
    let first: Vec<String> = fixture
        .store
        .search(&query, 5, &BTreeMap::new())
        .await
        .unwrap()
        .into_iter()
        .map(|hit| hit.chunk_id)
        .collect();
    let second: Vec<String> = fixture
        .store
        .search(&query, 5, &BTreeMap::new())
        .await
        .unwrap()
        .into_iter()
        .map(|hit| hit.chunk_id)
        .collect();
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
