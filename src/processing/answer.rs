//! Query-time retrieval and answer assembly.
//!
//! A query moves forward through `Embedding → Retrieving`, then either ends
//! as `Insufficient` (nothing cleared the relevance floor) or continues
//! through `Generating` to `Answered` or `DegradedAnswer`. Failures after
//! retrieval degrade forward; nothing loops back to an earlier stage, and a
//! query never returns an error once retrieval has completed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::generation::GenerationClient;
use crate::metrics::{PipelineMetrics, QueryOutcome};
use crate::store::{SearchMatch, VectorStore};

use super::types::{Answer, Citation, Confidence, QueryError};

/// Two scores within this distance are treated as the same evidence.
///
/// Near-duplicate chunks of the top hit then reinforce it instead of
/// erasing its margin over genuinely different runners-up.
const SCORE_CLUSTER_EPSILON: f32 = 0.01;

const INSUFFICIENT_ANSWER: &str =
    "The indexed manuals do not contain enough information to answer this question.";

/// Tuning knobs for retrieval and confidence calibration.
#[derive(Debug, Clone, Copy)]
pub struct AnswerOptions {
    /// Candidates retrieved per query when the caller does not override.
    pub default_top_k: usize,
    /// Minimum normalized score for a chunk to count as relevant.
    pub relevance_floor: f32,
    /// Top score required for a high-confidence answer.
    pub high_threshold: f32,
    /// Margin over the next distinct score required for high confidence.
    pub high_margin: f32,
    /// Top score required for at least medium confidence.
    pub medium_threshold: f32,
    /// Character budget for retrieved context in the prompt.
    pub prompt_context_budget: usize,
    /// Timeout for one generation call.
    pub generation_timeout: Duration,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            relevance_floor: 0.40,
            high_threshold: 0.82,
            high_margin: 0.05,
            medium_threshold: 0.65,
            prompt_context_budget: 6000,
            generation_timeout: Duration::from_secs(20),
        }
    }
}

impl AnswerOptions {
    /// Derive options from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_top_k: config.search_default_top_k.max(1),
            relevance_floor: config.relevance_floor,
            high_threshold: config.high_confidence_threshold,
            high_margin: config.high_confidence_margin,
            medium_threshold: config.medium_confidence_threshold,
            prompt_context_budget: config.prompt_context_budget,
            generation_timeout: Duration::from_secs(config.generation_timeout_secs),
        }
    }
}

/// Answers natural-language questions from the indexed manuals.
///
/// Uses the same embedder instance as ingestion (the store's initialization
/// guard enforces this) and treats the generation endpoint as optional: when
/// it is absent, fails, or times out, the best-matching chunk is returned
/// verbatim with confidence capped at low.
pub struct AnswerService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    generation: Option<Arc<dyn GenerationClient>>,
    metrics: Arc<PipelineMetrics>,
    options: AnswerOptions,
}

impl AnswerService {
    /// Build a service over explicit store, embedder, and generation handles.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        generation: Option<Arc<dyn GenerationClient>>,
        metrics: Arc<PipelineMetrics>,
        options: AnswerOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            generation,
            metrics,
            options,
        }
    }

    /// Answer a query with retrieved manual context and citations.
    ///
    /// `filter` restricts retrieval to chunks whose metadata matches every
    /// key/value pair exactly (brand, model, tags). Errors surface only from
    /// the embedding and retrieval stages; afterwards the answer degrades
    /// instead of failing.
    pub async fn query(
        &self,
        query_text: &str,
        filter: &BTreeMap<String, String>,
        top_k: Option<usize>,
    ) -> Result<Answer, QueryError> {
        let top_k = top_k.unwrap_or(self.options.default_top_k).max(1);
        let vector = self.embedder.embed(query_text).await?;
        let matches = self.store.search(&vector, top_k, filter).await?;

        let relevant: Vec<SearchMatch> = matches
            .into_iter()
            .filter(|hit| hit.score >= self.options.relevance_floor)
            .collect();
        if relevant.is_empty() {
            tracing::debug!(query = query_text, "No chunk cleared the relevance floor");
            self.metrics.record_query(QueryOutcome::Insufficient);
            return Ok(Answer {
                text: INSUFFICIENT_ANSWER.to_string(),
                confidence: Confidence::None,
                citations: Vec::new(),
            });
        }

        let confidence = self.calibrate(&relevant);
        let citations: Vec<Citation> = relevant
            .iter()
            .map(|hit| Citation {
                document_id: hit.document_id.clone(),
                chunk_id: hit.chunk_id.clone(),
                page_estimate: hit.page_estimate,
                score: hit.score,
            })
            .collect();

        if let Some(client) = &self.generation {
            let prompt = self.build_prompt(query_text, &relevant);
            let generated =
                tokio::time::timeout(self.options.generation_timeout, client.generate(&prompt))
                    .await;
            match generated {
                Ok(Ok(text)) => {
                    self.metrics.record_query(QueryOutcome::Answered);
                    return Ok(Answer {
                        text,
                        confidence,
                        citations,
                    });
                }
                Ok(Err(error)) => {
                    tracing::warn!(error = %error, "Generation failed; degrading to verbatim chunk");
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_secs = self.options.generation_timeout.as_secs(),
                        "Generation timed out; degrading to verbatim chunk"
                    );
                }
            }
        }

        // Degraded path: the best chunk verbatim beats failing the query.
        self.metrics.record_query(QueryOutcome::Degraded);
        Ok(Answer {
            text: relevant[0].text.clone(),
            confidence: confidence.min_low(),
            citations,
        })
    }

    /// Calibrate confidence from the retained score distribution.
    fn calibrate(&self, relevant: &[SearchMatch]) -> Confidence {
        let top = relevant[0].score;
        // First score outside the top cluster; near-duplicates of the top
        // chunk do not count as competition.
        let runner_up = relevant
            .iter()
            .map(|hit| hit.score)
            .find(|score| top - score > SCORE_CLUSTER_EPSILON);
        let clear_margin = match runner_up {
            Some(runner) => top - runner >= self.options.high_margin,
            None => true,
        };

        if top >= self.options.high_threshold && clear_margin {
            Confidence::High
        } else if top >= self.options.medium_threshold {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }

    /// Assemble the generation prompt: context excerpts most relevant first,
    /// truncated to the character budget, then the user question.
    fn build_prompt(&self, query_text: &str, relevant: &[SearchMatch]) -> String {
        let mut context = String::new();
        for (position, hit) in relevant.iter().enumerate() {
            let label = match (hit.metadata.get("brand"), hit.metadata.get("model")) {
                (Some(brand), Some(model)) => format!("{brand} {model}, "),
                (Some(brand), None) => format!("{brand}, "),
                _ => String::new(),
            };
            let excerpt = format!(
                "Excerpt {} ({label}page {}):\n{}\n\n",
                position + 1,
                hit.page_estimate,
                hit.text
            );
            if context.chars().count() + excerpt.chars().count()
                > self.options.prompt_context_budget
            {
                break;
            }
            context.push_str(&excerpt);
        }

        format!(
            "You are a service assistant for refrigerated container equipment. \
             Answer the question using only the manual excerpts below. \
             If the excerpts do not contain the answer, say so.\n\n\
             {context}Question: {query_text}"
        )
    }
}

impl Confidence {
    /// Cap a confidence label at [`Confidence::Low`] for degraded answers.
    fn min_low(self) -> Self {
        match self {
            Self::None => Self::None,
            _ => Self::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::collections::HashSet;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed_batch(
            &self,
            texts: &[String],
        ) -> Result<Vec<Vec<f32>>, crate::embedding::EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimensionality(&self) -> usize {
            2
        }

        fn fingerprint(&self) -> String {
            "test/fixed/2".into()
        }
    }

    /// Store stub returning a canned result list.
    struct CannedStore {
        matches: Vec<SearchMatch>,
    }

    #[async_trait]
    impl VectorStore for CannedStore {
        async fn initialize(&self, _: usize, _: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn upsert(
            &self,
            _: Vec<crate::store::ChunkRecord>,
        ) -> Result<crate::store::UpsertOutcome, StoreError> {
            Ok(crate::store::UpsertOutcome::default())
        }

        async fn existing_ids(&self, _: &[String]) -> Result<HashSet<String>, StoreError> {
            Ok(HashSet::new())
        }

        async fn search(
            &self,
            _: &[f32],
            top_k: usize,
            _: &BTreeMap<String, String>,
        ) -> Result<Vec<SearchMatch>, StoreError> {
            Ok(self.matches.iter().take(top_k).cloned().collect())
        }

        async fn delete_by_document(&self, _: &str) -> Result<(), StoreError> {
            Ok(())
        }

        async fn stats(&self) -> Result<crate::store::StoreStats, StoreError> {
            Ok(crate::store::StoreStats::default())
        }
    }

    fn hit(chunk_id: &str, score: f32) -> SearchMatch {
        SearchMatch {
            chunk_id: chunk_id.to_string(),
            document_id: "manual-1".to_string(),
            text: format!("content of {chunk_id}"),
            page_estimate: 1,
            metadata: BTreeMap::new(),
            score,
        }
    }

    fn service(matches: Vec<SearchMatch>) -> AnswerService {
        AnswerService::new(
            Arc::new(CannedStore { matches }),
            Arc::new(FixedEmbedder),
            None,
            Arc::new(PipelineMetrics::new()),
            AnswerOptions::default(),
        )
    }

    #[tokio::test]
    async fn empty_results_yield_insufficient_answer() {
        let answer = service(Vec::new())
            .query("what is alarm 17", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!(answer.confidence, Confidence::None);
        assert!(answer.citations.is_empty());
        assert_eq!(answer.text, INSUFFICIENT_ANSWER);
    }

    #[tokio::test]
    async fn below_floor_results_are_discarded() {
        let answer = service(vec![hit("manual-1:0000", 0.2)])
            .query("what is alarm 17", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!(answer.confidence, Confidence::None);
    }

    #[tokio::test]
    async fn missing_generation_client_degrades_with_citations() {
        let answer = service(vec![hit("manual-1:0000", 0.9), hit("manual-1:0001", 0.5)])
            .query("what is alarm 17", &BTreeMap::new(), None)
            .await
            .unwrap();
        assert_eq!(answer.confidence, Confidence::Low);
        assert_eq!(answer.text, "content of manual-1:0000");
        assert_eq!(answer.citations.len(), 2);
        assert_eq!(answer.citations[0].chunk_id, "manual-1:0000");
    }

    #[test]
    fn calibration_tiers_follow_thresholds() {
        let svc = service(Vec::new());
        assert_eq!(
            svc.calibrate(&[hit("a", 0.9), hit("b", 0.5)]),
            Confidence::High
        );
        assert_eq!(
            svc.calibrate(&[hit("a", 0.9), hit("b", 0.88)]),
            Confidence::Medium
        );
        assert_eq!(svc.calibrate(&[hit("a", 0.7)]), Confidence::Medium);
        assert_eq!(svc.calibrate(&[hit("a", 0.45)]), Confidence::Low);
    }

    #[test]
    fn near_duplicate_of_top_hit_does_not_lower_confidence() {
        let svc = service(Vec::new());
        let without_duplicate = svc.calibrate(&[hit("a", 0.9), hit("b", 0.5)]);
        let with_duplicate = svc.calibrate(&[hit("a", 0.9), hit("a2", 0.895), hit("b", 0.5)]);
        assert_eq!(without_duplicate, Confidence::High);
        assert_eq!(with_duplicate, Confidence::High);
    }

    #[test]
    fn prompt_respects_context_budget_and_order() {
        let mut svc = service(Vec::new());
        svc.options.prompt_context_budget = 60;
        let hits = vec![hit("manual-1:0000", 0.9), hit("manual-1:0001", 0.8)];
        let prompt = svc.build_prompt("why is it icing", &hits);
        assert!(prompt.contains("content of manual-1:0000"));
        assert!(!prompt.contains("content of manual-1:0001"));
        assert!(prompt.ends_with("Question: why is it icing"));
    }
}
