//! Note-to-policy search: de-identify, embed, rank, filter.

use std::sync::Arc;

use greenlight_core::config::SearchConfig;
use greenlight_core::error::{GreenlightError, Result};
use greenlight_core::{Deidentifier, RedactionMethod, WorkerPool};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{EmbedOutcome, EmbeddingEngine};
use crate::index::{PolicyDocument, PolicyIndex, PolicyMatch};

/// Per-query search options.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Maximum number of results.
    pub limit: usize,
    /// Results scoring below this are dropped.
    pub min_score: f32,
    /// Restrict results to one specialty.
    pub specialty: Option<String>,
}

impl SearchOptions {
    /// Defaults from configuration, with no specialty filter.
    pub fn from_config(config: &SearchConfig) -> Self {
        Self {
            limit: config.default_limit,
            min_score: config.min_score,
            specialty: None,
        }
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

/// Matches for one note, plus how the query was prepared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub matches: Vec<PolicyMatch>,
    /// The de-identified note text that was embedded.
    pub query_text: String,
    /// True when the query embedding fell back to a zero vector.
    pub degraded_query: bool,
}

/// Matches clinical notes against indexed payer policies.
///
/// Notes are always de-identified before they are embedded.
pub struct PolicySearch {
    deidentifier: Arc<Deidentifier>,
    engine: Arc<EmbeddingEngine>,
    index: PolicyIndex,
    pool: WorkerPool,
    max_limit: usize,
}

impl PolicySearch {
    pub fn new(
        deidentifier: Arc<Deidentifier>,
        engine: Arc<EmbeddingEngine>,
        index: PolicyIndex,
        pool: WorkerPool,
    ) -> Self {
        Self {
            deidentifier,
            engine,
            index,
            pool,
            max_limit: SearchConfig::default().max_limit,
        }
    }

    /// Cap on `SearchOptions::limit`.
    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit.max(1);
        self
    }

    pub fn index(&self) -> &PolicyIndex {
        &self.index
    }

    pub fn engine(&self) -> &EmbeddingEngine {
        &self.engine
    }

    /// Embed and index policy chunks, returning how many were indexed.
    ///
    /// Chunks whose embedding degraded are skipped: a zero vector would
    /// never match anything.
    pub async fn index_policies(&self, documents: Vec<PolicyDocument>, batch_size: usize) -> Result<usize> {
        let texts: Vec<String> = documents.iter().map(|d| d.text.clone()).collect();
        let outcomes = self
            .engine
            .embed_batch_async(&self.pool, texts, batch_size)
            .await;

        let mut indexed = 0usize;
        for (document, outcome) in documents.into_iter().zip(outcomes) {
            if let EmbedOutcome::Degraded { reason, .. } = &outcome {
                warn!(policy = %document.id, %reason, "Skipping policy with degraded embedding");
                continue;
            }
            self.index.insert(document, outcome.into_vector())?;
            indexed += 1;
        }

        info!(indexed, total = self.index.len(), "Policies indexed");
        Ok(indexed)
    }

    /// Index a single policy chunk. Returns false if its embedding degraded.
    pub async fn index_policy(&self, document: PolicyDocument) -> Result<bool> {
        Ok(self.index_policies(vec![document], 1).await? == 1)
    }

    /// Find the policies most similar to a clinical note.
    ///
    /// Fails only if de-identification produced the failure sentinel; the
    /// sentinel is never embedded.
    pub async fn search(&self, note_text: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let result = self
            .deidentifier
            .process_async(&self.pool, note_text.to_string())
            .await;
        if result.method == RedactionMethod::Failed {
            return Err(GreenlightError::Deidentification(
                "note could not be de-identified".to_string(),
            ));
        }
        debug!(
            method = ?result.method,
            reduction_ratio = result.report.reduction_ratio,
            issues = result.report.issues.len(),
            "Query note de-identified"
        );

        let outcome = self
            .engine
            .embed_async(&self.pool, result.text.clone())
            .await;
        let degraded_query = outcome.is_degraded();
        if degraded_query {
            warn!("Query embedding degraded; no policy will match");
        }

        let limit = options.limit.min(self.max_limit);
        let matches: Vec<PolicyMatch> = self
            .index
            .search(outcome.vector(), limit, options.specialty.as_deref())?
            .into_iter()
            .filter(|m| m.score >= options.min_score)
            .collect();

        info!(
            matches = matches.len(),
            limit,
            min_score = options.min_score,
            specialty = options.specialty.as_deref().unwrap_or("any"),
            "Policy search complete"
        );

        Ok(SearchResponse {
            matches,
            query_text: result.text,
            degraded_query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::MockEmbeddingModel;
    use greenlight_core::config::DeidConfig;
    use greenlight_storage::MemoryCacheStore;

    fn search_with(deid: DeidConfig) -> PolicySearch {
        let model = Arc::new(MockEmbeddingModel::new("mock-model", 64).unwrap());
        let engine = Arc::new(EmbeddingEngine::new(model, Arc::new(MemoryCacheStore::new())));
        PolicySearch::new(
            Arc::new(Deidentifier::new(deid).unwrap()),
            engine,
            PolicyIndex::new(),
            WorkerPool::new(2),
        )
    }

    fn policy(id: &str, text: &str, specialty: Option<&str>) -> PolicyDocument {
        PolicyDocument {
            id: id.to_string(),
            text: text.to_string(),
            specialty: specialty.map(str::to_string),
        }
    }

    fn any_score() -> SearchOptions {
        SearchOptions {
            limit: 10,
            min_score: -1.0,
            specialty: None,
        }
    }

    #[tokio::test]
    async fn test_exact_text_matches_with_score_one() {
        let search = search_with(DeidConfig::default());
        search
            .index_policies(
                vec![
                    policy("p1", "echocardiogram requires prior authorization", Some("Cardiology")),
                    policy("p2", "knee MRI after six weeks of therapy", Some("Orthopedics")),
                ],
                8,
            )
            .await
            .unwrap();

        let response = search
            .search("echocardiogram requires prior authorization", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(response.matches.len(), 1);
        assert_eq!(response.matches[0].id, "p1");
        assert!((response.matches[0].score - 1.0).abs() < 1e-5);
        assert!(!response.degraded_query);
    }

    #[tokio::test]
    async fn test_query_is_deidentified_before_embedding() {
        let search = search_with(DeidConfig::default());
        let response = search
            .search("Seen by Jane Doe, SSN 123-45-6789", &any_score())
            .await
            .unwrap();
        assert!(response.query_text.contains("[NAME]"));
        assert!(response.query_text.contains("[SSN]"));
        assert!(!response.query_text.contains("123-45-6789"));
    }

    #[tokio::test]
    async fn test_specialty_filter_and_limit() {
        let search = search_with(DeidConfig::default());
        search
            .index_policies(
                vec![
                    policy("c1", "cardiac stress test", Some("Cardiology")),
                    policy("c2", "holter monitor", Some("Cardiology")),
                    policy("o1", "knee arthroscopy", Some("Orthopedics")),
                ],
                2,
            )
            .await
            .unwrap();

        let options = SearchOptions {
            limit: 5,
            min_score: -1.0,
            specialty: Some("Cardiology".to_string()),
        };
        let response = search.search("chest pain workup", &options).await.unwrap();
        assert_eq!(response.matches.len(), 2);
        assert!(response
            .matches
            .iter()
            .all(|m| m.specialty.as_deref() == Some("Cardiology")));

        let options = SearchOptions {
            limit: 1,
            ..any_score()
        };
        assert_eq!(search.search("chest pain", &options).await.unwrap().matches.len(), 1);
    }

    #[tokio::test]
    async fn test_threshold_filters_weak_matches() {
        let search = search_with(DeidConfig::default());
        search
            .index_policy(policy("p1", "durable medical equipment", None))
            .await
            .unwrap();
        let options = SearchOptions {
            limit: 5,
            min_score: 1.01,
            specialty: None,
        };
        let response = search.search("durable medical equipment", &options).await.unwrap();
        assert!(response.matches.is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_returns_no_matches() {
        let search = search_with(DeidConfig::default());
        let response = search.search("anything", &any_score()).await.unwrap();
        assert!(response.matches.is_empty());
    }

    #[tokio::test]
    async fn test_empty_policy_text_is_skipped() {
        let search = search_with(DeidConfig::default());
        let indexed = search
            .index_policies(vec![policy("blank", "   ", None), policy("ok", "text", None)], 4)
            .await
            .unwrap();
        assert_eq!(indexed, 1);
        assert_eq!(search.index().len(), 1);
    }

    #[tokio::test]
    async fn test_deidentification_failure_aborts_search() {
        let search = search_with(DeidConfig {
            max_input_bytes: 8,
            ..DeidConfig::default()
        });
        let err = search
            .search("a note longer than eight bytes", &any_score())
            .await
            .unwrap_err();
        assert!(matches!(err, GreenlightError::Deidentification(_)));
    }

    #[tokio::test]
    async fn test_limit_capped_by_max_limit() {
        let search = search_with(DeidConfig::default()).with_max_limit(1);
        search
            .index_policies(vec![policy("a", "alpha", None), policy("b", "beta", None)], 2)
            .await
            .unwrap();
        let response = search.search("alpha", &any_score()).await.unwrap();
        assert_eq!(response.matches.len(), 1);
    }
}
