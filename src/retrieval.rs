//! Retrieval stage: concurrent semantic/keyword search, fusion and filtering

use crate::selection::{fuse_results, select, source_distribution};
use crate::similarity::{SearchFilters, SearchRequest, SimilarityStore};
use crate::strategy::FOCUSED_MIN_FLOOR;
use crate::types::*;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Over-fetch factor so filtering still leaves enough candidates
const FETCH_MULTIPLIER: usize = 3;

const PRIMARY_SOURCES: [SourceType; 3] = [SourceType::Statute, SourceType::CaseLaw, SourceType::Regulation];

#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    pub documents: Vec<RetrievedDocument>,
    pub candidates_seen: usize,
    pub degraded: Vec<DegradedNote>,
}

pub struct RetrievalStage {
    semantic: Arc<dyn SimilarityStore>,
    keyword: Option<Arc<dyn SimilarityStore>>,
    timeout: Duration,
}

impl RetrievalStage {
    pub fn new(
        semantic: Arc<dyn SimilarityStore>,
        keyword: Option<Arc<dyn SimilarityStore>>,
        timeout: Duration,
    ) -> Self {
        Self { semantic, keyword, timeout }
    }

    pub async fn health_check(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, self.semantic.health_check()).await,
            Ok(Ok(true))
        )
    }

    /// Retrieve documents for one attempt. Never fails: store errors and
    /// timeouts leave an empty (or partial) list plus a degraded note.
    pub async fn retrieve(
        &self,
        query_text: &str,
        keywords: &[String],
        strategy: Strategy,
        params: &StrategyParams,
    ) -> RetrievalOutcome {
        let filters = SearchFilters {
            source_types: if params.use_secondary_sources {
                Vec::new()
            } else {
                PRIMARY_SOURCES.to_vec()
            },
        };
        let request = SearchRequest {
            query: query_text.to_string(),
            keywords: keywords.to_vec(),
            filters,
            k: params.max_sources * FETCH_MULTIPLIER,
        };

        let keyword_store = match params.retrieval_mode {
            RetrievalMode::Hybrid => self.keyword.as_ref(),
            RetrievalMode::Semantic => None,
        };

        let semantic_fut = self.search_one(self.semantic.as_ref(), &request);
        let (semantic_res, keyword_res) = match keyword_store {
            Some(store) => {
                let keyword_fut = self.search_one(store.as_ref(), &request);
                let (s, k) = futures::join!(semantic_fut, keyword_fut);
                (s, Some(k))
            }
            None => (semantic_fut.await, None),
        };

        let mut outcome = RetrievalOutcome::default();
        let mut lists = Vec::new();
        let mut failures = Vec::new();
        let channels = std::iter::once((self.semantic.name(), semantic_res))
            .chain(keyword_store.zip(keyword_res).map(|(store, res)| (store.name(), res)));
        let mut attempted = 0;
        for (name, res) in channels {
            attempted += 1;
            match res {
                Ok(docs) => {
                    debug!("{} returned {} documents", name, docs.len());
                    lists.push(docs);
                }
                Err(e) => {
                    warn!("Similarity store {} failed: {:#}", name, e);
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        if failures.len() == attempted {
            outcome.degraded.push(DegradedNote::new(
                PipelineStage::Retrieval,
                format!("similarity store unavailable ({})", failures.join("; ")),
            ));
            return outcome;
        }
        if !failures.is_empty() {
            outcome.degraded.push(DegradedNote::new(
                PipelineStage::Retrieval,
                format!("partial retrieval ({})", failures.join("; ")),
            ));
        }

        let fused = fuse_results(lists);
        outcome.candidates_seen = fused.len();

        let fused: Vec<RetrievedDocument> = fused
            .into_iter()
            .filter(|d| params.use_secondary_sources || d.source_type.is_primary())
            .collect();

        let floor = if strategy == Strategy::Focused {
            params.relevance_floor.max(FOCUSED_MIN_FLOOR)
        } else {
            params.relevance_floor
        };
        outcome.documents = select(fused, floor, params.max_sources, params.diversify_by_source);

        if outcome.documents.is_empty() {
            outcome.degraded.push(DegradedNote::new(
                PipelineStage::Retrieval,
                "no supporting documents cleared the relevance floor",
            ));
        }

        debug!("Selected source mix: {:?}", source_distribution(&outcome.documents));
        info!(
            "Retrieval: {} candidates, {} selected (strategy={}, floor={:.2})",
            outcome.candidates_seen,
            outcome.documents.len(),
            strategy.as_str(),
            floor
        );
        outcome
    }

    async fn search_one(
        &self,
        store: &dyn SimilarityStore,
        request: &SearchRequest,
    ) -> Result<Vec<RetrievedDocument>> {
        match tokio::time::timeout(self.timeout, store.search(request)).await {
            Ok(res) => res,
            Err(_) => anyhow::bail!("timed out after {}ms", self.timeout.as_millis()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::MockSimilarityStore;
    use crate::strategy::params_for;
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl SimilarityStore for DownStore {
        fn name(&self) -> &'static str {
            "down"
        }
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<RetrievedDocument>> {
            anyhow::bail!("connection refused")
        }
        async fn health_check(&self) -> Result<bool> {
            anyhow::bail!("connection refused")
        }
    }

    struct SlowStore;

    #[async_trait]
    impl SimilarityStore for SlowStore {
        fn name(&self) -> &'static str {
            "slow"
        }
        async fn search(&self, _request: &SearchRequest) -> Result<Vec<RetrievedDocument>> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(vec![])
        }
    }

    fn doc(id: &str, score: f32, source_type: SourceType) -> RetrievedDocument {
        RetrievedDocument {
            doc_id: id.into(),
            title: id.into(),
            excerpt: "text".into(),
            relevance_score: score,
            source_type,
        }
    }

    fn stage(semantic: Arc<dyn SimilarityStore>, keyword: Option<Arc<dyn SimilarityStore>>) -> RetrievalStage {
        RetrievalStage::new(semantic, keyword, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_focused_never_returns_below_floor() {
        let store = Arc::new(MockSimilarityStore::new(vec![
            doc("a", 0.95, SourceType::Statute),
            doc("b", 0.79, SourceType::Statute),
            doc("c", 0.5, SourceType::CaseLaw),
        ]));
        let mut params = params_for(Strategy::Focused);
        params.relevance_floor = 0.2;
        let out = stage(store, None).retrieve("q", &[], Strategy::Focused, &params).await;
        assert_eq!(out.documents.len(), 1);
        assert!(out.documents.iter().all(|d| d.relevance_score >= 0.8));
    }

    #[tokio::test]
    async fn test_hybrid_merges_and_dedups() {
        let semantic = Arc::new(MockSimilarityStore::new(vec![doc("a", 0.6, SourceType::Statute)]));
        let keyword = Arc::new(MockSimilarityStore::new(vec![
            doc("a", 0.9, SourceType::Statute),
            doc("b", 0.7, SourceType::CaseLaw),
        ]));
        let params = params_for(Strategy::Comprehensive);
        let out = stage(semantic, Some(keyword))
            .retrieve("q", &[], Strategy::Comprehensive, &params)
            .await;
        assert_eq!(out.documents.len(), 2);
        assert_eq!(out.documents[0].doc_id, "a");
        assert!((out.documents[0].relevance_score - 0.9).abs() < 1e-6);
        assert!(out.degraded.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_degrades_to_empty() {
        let params = params_for(Strategy::Comprehensive);
        let out = stage(Arc::new(DownStore), None)
            .retrieve("q", &[], Strategy::Comprehensive, &params)
            .await;
        assert!(out.documents.is_empty());
        assert_eq!(out.degraded.len(), 1);
        assert!(out.degraded[0].reason.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_timeout_is_soft_and_partial_results_survive() {
        let keyword = Arc::new(MockSimilarityStore::new(vec![doc("k", 0.9, SourceType::Statute)]));
        let params = params_for(Strategy::Comprehensive);
        let out = stage(Arc::new(SlowStore), Some(keyword))
            .retrieve("q", &[], Strategy::Comprehensive, &params)
            .await;
        assert_eq!(out.documents.len(), 1);
        assert!(out.degraded[0].reason.contains("partial"));
    }

    #[tokio::test]
    async fn test_secondary_sources_excluded_when_disabled() {
        let store = Arc::new(MockSimilarityStore::new(vec![
            doc("g", 0.99, SourceType::Guidance),
            doc("s", 0.6, SourceType::Statute),
        ]));
        let params = params_for(Strategy::Quick);
        let out = stage(store, None).retrieve("q", &[], Strategy::Quick, &params).await;
        assert_eq!(out.documents.iter().map(|d| d.doc_id.as_str()).collect::<Vec<_>>(), vec!["s"]);
    }

    #[tokio::test]
    async fn test_health_check_reports_down_store() {
        assert!(!stage(Arc::new(DownStore), None).health_check().await);
        let up = Arc::new(MockSimilarityStore::new(vec![]));
        assert!(stage(up, None).health_check().await);
    }
}
