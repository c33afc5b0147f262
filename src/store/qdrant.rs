//! Remote vector store backend over the Qdrant HTTP API.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashSet};

use super::payload::{
    build_payload, current_timestamp_rfc3339, metadata_from_payload, point_id_for_chunk,
};
use super::types::{ChunkRecord, SearchMatch, StoreError, StoreStats, UpsertOutcome};
use super::{FailedRecord, VectorStore, with_backoff};

/// Vector store backed by a remote, rate-limited Qdrant instance.
///
/// Transient failures (transport errors, 5xx, 429) are retried with bounded
/// exponential backoff before being surfaced.
pub struct QdrantStore {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
    // Set by `initialize`, stamped into every point payload for audit.
    fingerprint: std::sync::RwLock<String>,
}

impl QdrantStore {
    /// Construct a new store handle for the given Qdrant endpoint.
    pub fn new(
        url: &str,
        collection: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().user_agent("manualkb/0.2").build()?;
        let base_url = normalize_base_url(url).map_err(StoreError::InvalidUrl)?;
        let collection = collection.into();
        tracing::debug!(
            url = %base_url,
            collection = %collection,
            has_api_key = api_key.as_deref().map(|value| !value.is_empty()).unwrap_or(false),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            collection,
            api_key,
            fingerprint: std::sync::RwLock::new(String::new()),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success(&self, response: reqwest::Response) -> Result<(), StoreError> {
        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(StoreError::UnexpectedStatus { status, body })
        }
    }

    async fn collection_vector_size(&self) -> Result<Option<usize>, StoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let payload: CollectionInfoResponse = response.json().await?;
                Ok(Some(payload.result.config.params.vectors.size))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::UnexpectedStatus { status, body })
            }
        }
    }

    async fn create_collection(&self, dimension: usize) -> Result<(), StoreError> {
        let body = json!({
            "vectors": {
                "size": dimension,
                "distance": "Cosine"
            }
        });
        let response = self
            .request(Method::PUT, &format!("collections/{}", self.collection))
            .json(&body)
            .send()
            .await?;
        self.ensure_success(response).await
    }

    /// Ensure keyword indexes exist for the fields exact-match filters use.
    async fn ensure_payload_indexes(&self) -> Result<(), StoreError> {
        let fields = ["document_id", "chunk_id", "meta_brand", "meta_model"];

        for field in fields {
            let body = json!({
                "field_name": field,
                "field_schema": "keyword",
            });
            let response = self
                .request(
                    Method::PUT,
                    &format!("collections/{}/index", self.collection),
                )
                .json(&body)
                .send()
                .await?;

            match response.status() {
                status if status.is_success() => {
                    tracing::debug!(collection = %self.collection, field, "Payload index ensured");
                }
                StatusCode::CONFLICT => {
                    tracing::debug!(collection = %self.collection, field, "Payload index already exists");
                }
                status => {
                    let body = response.text().await.unwrap_or_default();
                    let error = StoreError::UnexpectedStatus { status, body };
                    tracing::warn!(collection = %self.collection, field, error = %error, "Failed to ensure payload index");
                }
            }
        }

        Ok(())
    }

    async fn upsert_points(&self, records: &[ChunkRecord], fingerprint: &str) -> Result<(), StoreError> {
        let now = current_timestamp_rfc3339();
        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": point_id_for_chunk(&record.chunk_id),
                    "vector": record.embedding,
                    "payload": build_payload(record, &now, fingerprint),
                })
            })
            .collect();

        let response = self
            .request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await?;
        self.ensure_success(response).await
    }

    async fn scroll_document_ids(&self) -> Result<HashSet<String>, StoreError> {
        let mut offset: Option<Value> = None;
        let mut documents = HashSet::new();

        loop {
            let mut body = json!({
                "with_payload": ["document_id"],
                "with_vector": false,
                "limit": 512,
            });
            if let Some(next) = &offset {
                body.as_object_mut()
                    .expect("scroll body should remain an object")
                    .insert("offset".into(), next.clone());
            }

            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points/scroll", self.collection),
                )
                .json(&body)
                .send()
                .await?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(StoreError::UnexpectedStatus { status, body });
            }

            let ScrollResponse { result } = response.json().await?;
            for point in result.points {
                if let Some(document_id) = point
                    .payload
                    .as_ref()
                    .and_then(|payload| payload.get("document_id"))
                    .and_then(Value::as_str)
                {
                    documents.insert(document_id.to_string());
                }
            }

            match result.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(documents)
    }
}

/// Build a Qdrant `must` filter from an exact-match metadata map.
///
/// Metadata keys are stored flattened under a `meta_` prefix, so the filter
/// keys are rewritten accordingly. Returns `None` for an empty map.
fn build_metadata_filter(filter: &BTreeMap<String, String>) -> Option<Value> {
    if filter.is_empty() {
        return None;
    }
    let must: Vec<Value> = filter
        .iter()
        .map(|(key, value)| {
            json!({
                "key": format!("meta_{key}"),
                "match": { "value": value }
            })
        })
        .collect();
    Some(json!({ "must": must }))
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn initialize(
        &self,
        dimension: usize,
        embedder_fingerprint: &str,
    ) -> Result<(), StoreError> {
        with_backoff("initialize", || async {
            match self.collection_vector_size().await? {
                Some(existing) if existing != dimension => Err(StoreError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                }),
                Some(_) => Ok(()),
                None => {
                    tracing::debug!(
                        collection = %self.collection,
                        dimension,
                        embedder = embedder_fingerprint,
                        "Creating collection"
                    );
                    self.create_collection(dimension).await
                }
            }
        })
        .await?;
        if let Ok(mut fingerprint) = self.fingerprint.write() {
            *fingerprint = embedder_fingerprint.to_string();
        }
        self.ensure_payload_indexes().await
    }

    async fn upsert(&self, records: Vec<ChunkRecord>) -> Result<UpsertOutcome, StoreError> {
        if records.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let fingerprint = self
            .fingerprint
            .read()
            .map(|value| value.clone())
            .unwrap_or_default();

        // Whole batch first; one slow record should not force N round trips.
        let batch_result =
            with_backoff("upsert", || self.upsert_points(&records, &fingerprint)).await;
        if batch_result.is_ok() {
            return Ok(UpsertOutcome {
                succeeded: records.len(),
                failed: Vec::new(),
            });
        }

        // The batch failed after retries; isolate bad records so the rest of
        // the document still lands.
        tracing::warn!(
            collection = %self.collection,
            records = records.len(),
            "Batch upsert failed after retries; falling back to per-record writes"
        );
        let mut outcome = UpsertOutcome::default();
        for record in records {
            let single = std::slice::from_ref(&record);
            match with_backoff("upsert", || self.upsert_points(single, &fingerprint)).await {
                Ok(()) => outcome.succeeded += 1,
                Err(error) => {
                    tracing::error!(
                        chunk_id = %record.chunk_id,
                        error = %error,
                        "Record upsert failed"
                    );
                    outcome.failed.push(FailedRecord {
                        chunk_id: record.chunk_id.clone(),
                        error,
                    });
                }
            }
        }
        Ok(outcome)
    }

    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let point_ids: Vec<String> = ids.iter().map(|id| point_id_for_chunk(id)).collect();
        let body = json!({
            "ids": point_ids,
            "with_payload": ["chunk_id"],
            "with_vector": false,
        });

        let response = with_backoff("existing_ids", || async {
            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points", self.collection),
                )
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(StoreError::UnexpectedStatus { status, body });
            }
            Ok(response.json::<RetrieveResponse>().await?)
        })
        .await?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| {
                point
                    .payload
                    .as_ref()
                    .and_then(|payload| payload.get("chunk_id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect())
    }

    async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: &BTreeMap<String, String>,
    ) -> Result<Vec<SearchMatch>, StoreError> {
        let mut body = json!({
            "query": query,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(filter_value) = build_metadata_filter(filter) {
            body.as_object_mut()
                .expect("query body should remain an object")
                .insert("filter".into(), filter_value);
        }

        let payload = with_backoff("search", || async {
            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points/query", self.collection),
                )
                .json(&body)
                .send()
                .await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(StoreError::UnexpectedStatus { status, body });
            }
            Ok(response.json::<QueryResponse>().await?)
        })
        .await?;

        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        Ok(points
            .into_iter()
            .filter_map(|point| {
                let payload = point.payload?;
                Some(SearchMatch {
                    chunk_id: payload.get("chunk_id")?.as_str()?.to_string(),
                    document_id: payload
                        .get("document_id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    text: payload
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    page_estimate: payload
                        .get("page_estimate")
                        .and_then(Value::as_u64)
                        .unwrap_or(1) as usize,
                    metadata: metadata_from_payload(&payload),
                    // Cosine similarity from Qdrant, mapped onto the shared
                    // [0, 1] scale used by every backend.
                    score: super::normalize_cosine(point.score),
                })
            })
            .collect())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<(), StoreError> {
        let body = json!({
            "filter": {
                "must": [
                    {
                        "key": "document_id",
                        "match": { "value": document_id }
                    }
                ]
            }
        });

        with_backoff("delete_by_document", || async {
            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points/delete", self.collection),
                )
                .query(&[("wait", true)])
                .json(&body)
                .send()
                .await?;
            self.ensure_success(response).await
        })
        .await?;
        tracing::debug!(collection = %self.collection, document_id, "Deleted document chunks");
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let count = with_backoff("stats", || async {
            let response = self
                .request(
                    Method::POST,
                    &format!("collections/{}/points/count", self.collection),
                )
                .json(&json!({ "exact": true }))
                .send()
                .await?;
            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(StoreError::UnexpectedStatus { status, body });
            }
            Ok(response.json::<CountResponse>().await?.result.count)
        })
        .await?;

        let distinct_documents = if count == 0 {
            0
        } else {
            self.scroll_document_ids().await?.len()
        };

        Ok(StoreStats {
            count,
            distinct_documents,
        })
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[derive(Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Deserialize)]
struct VectorParams {
    size: usize,
}

#[derive(Deserialize)]
struct RetrieveResponse {
    result: Vec<RetrievedPoint>,
}

#[derive(Deserialize)]
struct RetrievedPoint {
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct QueryResponse {
    result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
struct QueryPoint {
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Deserialize)]
struct ScrollResult {
    #[serde(default)]
    points: Vec<RetrievedPoint>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
struct CountResponse {
    result: CountResult,
}

#[derive(Deserialize)]
struct CountResult {
    count: usize,
}
