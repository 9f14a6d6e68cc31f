//! Research orchestrator: runs the stage pipeline with confidence-gated retry

use crate::config::{AgentConfig, MemoryConfig, PipelineConfig};
use crate::context_analyzer::ContextAnalyzer;
use crate::error::{AgentError, AgentResult};
use crate::formatter::{AnswerFormatter, FormatInput};
use crate::health::ModelHealthTracker;
use crate::keywords;
use crate::llm::LanguageModel;
use crate::memory::MemoryStore;
use crate::reasoning::ReasoningStage;
use crate::retrieval::RetrievalStage;
use crate::similarity::SimilarityStore;
use crate::strategy::{RoutePlan, StrategyRouter};
use crate::summarizer::SummarizationStage;
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Entries scanned for earlier questions in the same conversation
const CONVERSATION_WINDOW: usize = 10;

/// External handles the agent is built from
#[derive(Clone)]
pub struct Collaborators {
    pub semantic: Arc<dyn SimilarityStore>,
    pub keyword: Option<Arc<dyn SimilarityStore>>,
    pub model: Arc<dyn LanguageModel>,
    pub memory: Arc<dyn MemoryStore>,
}

/// Outcome of comparing one attempt against the threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    Accept,
    Retry,
    Exhausted,
}

/// `attempts` counts attempts made so far, including the one being judged
pub fn evaluate(confidence: f32, threshold: f32, attempts: usize, retry_budget: usize) -> Evaluation {
    if confidence >= threshold {
        Evaluation::Accept
    } else if attempts <= retry_budget {
        Evaluation::Retry
    } else {
        Evaluation::Exhausted
    }
}

/// What memory contributed to this run
#[derive(Debug, Default)]
struct History {
    related: Vec<ScoredMemory>,
    conversation: Vec<String>,
    note: Option<DegradedNote>,
}

impl History {
    fn available(&self) -> bool {
        self.note.is_none()
    }

    fn prior_queries(&self) -> Vec<String> {
        self.related.iter().map(|m| m.entry.query_text.clone()).collect()
    }
}

/// Main orchestrator (thread-safe via Arc)
pub struct ResearchAgent {
    pipeline: PipelineConfig,
    memory_config: MemoryConfig,
    analyzer: ContextAnalyzer,
    router: StrategyRouter,
    retrieval: RetrievalStage,
    summarizer: SummarizationStage,
    reasoning: ReasoningStage,
    formatter: AnswerFormatter,
    model: Arc<dyn LanguageModel>,
    memory: Arc<dyn MemoryStore>,
    health: Arc<ModelHealthTracker>,
}

pub type SharedResearchAgent = Arc<ResearchAgent>;

impl ResearchAgent {
    pub fn new(config: &AgentConfig, collaborators: Collaborators) -> SharedResearchAgent {
        let pipeline = config.pipeline.clone();
        let health = Arc::new(ModelHealthTracker::new(&config.models.model_ids));

        let retrieval = RetrievalStage::new(
            collaborators.semantic,
            collaborators.keyword,
            pipeline.retrieval_timeout(),
        );
        let reasoning = ReasoningStage::new(
            collaborators.model.clone(),
            config.models.model_ids.clone(),
            pipeline.model_attempts,
            pipeline.model_timeout(),
            health.clone(),
        );

        Arc::new(Self {
            summarizer: SummarizationStage::new(pipeline.excerpt_chars),
            formatter: AnswerFormatter::new(config.confidence.clone()),
            memory_config: config.memory.clone(),
            analyzer: ContextAnalyzer::new(),
            router: StrategyRouter::new(),
            retrieval,
            reasoning,
            model: collaborators.model,
            memory: collaborators.memory,
            health,
            pipeline,
        })
    }

    /// Answer a research query. Only an empty query is rejected; every
    /// collaborator failure degrades the response instead.
    pub async fn answer(&self, query: Query) -> AgentResult<AgentResponse> {
        self.answer_with_cancellation(query, CancellationToken::new()).await
    }

    /// Like `answer`, but abandons in-flight work when `cancel` fires.
    /// Nothing from a cancelled run is written to memory.
    pub async fn answer_with_cancellation(
        &self,
        query: Query,
        cancel: CancellationToken,
    ) -> AgentResult<AgentResponse> {
        if query.text.trim().is_empty() {
            return Err(AgentError::EmptyQuery);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Query cancelled by caller");
                Err(AgentError::Cancelled)
            }
            response = self.run(query) => Ok(response),
        }
    }

    async fn run(&self, query: Query) -> AgentResponse {
        let query_id = Uuid::new_v4();
        let span = info_span!("research", %query_id, user_id = ?query.user_id);
        self.run_pipeline(query_id, query).instrument(span).await
    }

    async fn run_pipeline(&self, query_id: Uuid, query: Query) -> AgentResponse {
        let start = Instant::now();

        info!("Answering query: '{}' (explicit strategy: {:?})", query.text, query.explicit_strategy);

        let blueprint = self.analyzer.analyze(&query.text, &query.hints);
        let history = self.load_history(&query).await;
        let mut plan = self.router.route(&blueprint, query.explicit_strategy);
        info!(
            "Blueprint: primary domain {:?} of {}, complexity {:?}, urgency {:?}, strategy {}",
            blueprint.primary_domain(),
            blueprint.detected_domains.len(),
            blueprint.complexity,
            blueprint.urgency,
            plan.strategy.as_str()
        );
        let mut search_keywords = blueprint.keywords.clone();

        let mut attempts = 1;
        let mut best = self
            .attempt(query_id, &query, &blueprint, &plan, &search_keywords, &history)
            .await;
        let mut latest = best.confidence;

        loop {
            match evaluate(latest, self.pipeline.confidence_threshold, attempts, self.pipeline.retry_budget) {
                Evaluation::Accept => break,
                Evaluation::Exhausted => {
                    info!(
                        "Retry budget exhausted after {} attempts; returning best confidence {:.2}",
                        attempts, best.confidence
                    );
                    break;
                }
                Evaluation::Retry => {
                    plan = self.router.broaden(&plan);
                    widen_keywords(&mut search_keywords, &history.related);
                    attempts += 1;
                    info!(
                        "Confidence {:.2} below threshold {:.2}; retrying as {} (max_sources={}, floor={:.2})",
                        latest,
                        self.pipeline.confidence_threshold,
                        plan.strategy.as_str(),
                        plan.params.max_sources,
                        plan.params.relevance_floor
                    );

                    let response = self
                        .attempt(query_id, &query, &blueprint, &plan, &search_keywords, &history)
                        .await;
                    latest = response.confidence;
                    if response.confidence > best.confidence {
                        best = response;
                    }
                }
            }
        }

        best.metadata.attempts = attempts;
        if let Some(note) = history.note.clone() {
            best.metadata.degraded.push(note);
        }

        if history.available() {
            if let Some(note) = self.remember(query_id, &query, &blueprint, &best).await {
                best.metadata.degraded.push(note);
            }
        }

        best.metadata.timings.total_ms = start.elapsed().as_millis() as u64;
        info!(
            "Answered with {} citations, confidence {:.2}, strategy {} in {}ms",
            best.citations.len(),
            best.confidence,
            best.strategy_used.as_str(),
            best.metadata.timings.total_ms
        );
        best
    }

    /// One pass of retrieve → summarize → reason → format
    async fn attempt(
        &self,
        query_id: Uuid,
        query: &Query,
        blueprint: &ContextBlueprint,
        plan: &RoutePlan,
        search_keywords: &[String],
        history: &History,
    ) -> AgentResponse {
        let t = Instant::now();
        let retrieval = self
            .retrieval
            .retrieve(&query.text, search_keywords, plan.strategy, &plan.params)
            .instrument(info_span!("retrieve", strategy = plan.strategy.as_str()))
            .await;
        let retrieval_ms = t.elapsed().as_millis() as u64;

        let t = Instant::now();
        let groups = info_span!("summarize")
            .in_scope(|| self.summarizer.summarize(blueprint, &retrieval.documents));
        let summarization_ms = t.elapsed().as_millis() as u64;

        let t = Instant::now();
        let reasoning = self
            .reasoning
            .reason(query, blueprint, &groups, &history.conversation)
            .instrument(info_span!("reason", groups = groups.len()))
            .await;
        let reasoning_ms = t.elapsed().as_millis() as u64;

        let t = Instant::now();
        let prior_queries = history.prior_queries();
        let mut response = info_span!("format").in_scope(|| {
            self.formatter.format(&FormatInput {
                query_id,
                query,
                blueprint,
                strategy: plan.strategy,
                groups: &groups,
                reasoning: &reasoning,
                retrieval_notes: &retrieval.degraded,
                prior_queries: &prior_queries,
            })
        });

        response.metadata.documents_considered = retrieval.candidates_seen;
        response.metadata.timings = StageTimings {
            retrieval_ms,
            summarization_ms,
            reasoning_ms,
            formatting_ms: t.elapsed().as_millis() as u64,
            total_ms: 0,
        };
        response
    }

    /// Related prior queries and earlier questions of this conversation.
    /// A failing store leaves both empty and records a note.
    async fn load_history(&self, query: &Query) -> History {
        let Some(user_id) = query.user_id.as_deref() else {
            return History::default();
        };

        let lookups = async {
            futures::join!(
                self.memory.similar(user_id, &query.text, self.memory_config.related_limit * 2),
                self.memory.recent(user_id, CONVERSATION_WINDOW),
            )
        };

        let (similar, recent) = match tokio::time::timeout(self.memory_timeout(), lookups).await {
            Ok((Ok(similar), Ok(recent))) => (similar, recent),
            Ok((Err(e), _)) | Ok((_, Err(e))) => return History::unavailable(e.to_string()),
            Err(_) => return History::unavailable("memory lookup timed out".to_string()),
        };

        let related: Vec<ScoredMemory> = similar
            .into_iter()
            .filter(|m| m.entry.user_id == user_id)
            .filter(|m| m.shared_keywords >= self.memory_config.min_shared_keywords)
            .take(self.memory_config.related_limit)
            .collect();

        let conversation: Vec<String> = match query.conversation_id.as_deref() {
            Some(conversation_id) => recent
                .into_iter()
                .rev()
                .filter(|e| e.user_id == user_id && e.conversation_id.as_deref() == Some(conversation_id))
                .map(|e| e.query_text)
                .collect(),
            None => Vec::new(),
        };

        info!("Memory: {} related prior queries, {} earlier turns", related.len(), conversation.len());
        History { related, conversation, note: None }
    }

    /// Append the finished run to memory; returns a note when the write fails
    async fn remember(
        &self,
        query_id: Uuid,
        query: &Query,
        blueprint: &ContextBlueprint,
        response: &AgentResponse,
    ) -> Option<DegradedNote> {
        let user_id = query.user_id.clone()?;
        let entry = MemoryEntry {
            id: Uuid::new_v4(),
            user_id,
            query_text: query.text.clone(),
            conversation_id: query.conversation_id.clone(),
            context_used: MemoryContext {
                domains: blueprint.detected_domains.iter().copied().collect(),
                strategy: response.strategy_used,
                doc_ids: response.citations.iter().map(|c| c.source_ref.doc_id.clone()).collect(),
                confidence: response.confidence,
            },
            result_ref: query_id,
            created_at: Utc::now(),
        };

        match tokio::time::timeout(self.memory_timeout(), self.memory.append(&entry)).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => {
                let err = AgentError::MemoryUnavailable(e.to_string());
                warn!("Skipping memory write: {}", err);
                Some(DegradedNote::new(PipelineStage::Memory, err.to_string()))
            }
            Err(_) => {
                warn!("Skipping memory write: timed out");
                Some(DegradedNote::new(PipelineStage::Memory, "memory write timed out"))
            }
        }
    }

    fn memory_timeout(&self) -> Duration {
        self.pipeline.retrieval_timeout()
    }

    /// Pipeline availability, last-known model health and store reachability.
    /// Models never invoked yet are probed individually through the provider.
    pub async fn status(&self) -> HealthStatus {
        let probes = self.health.unobserved().into_iter().map(|model_id| async move {
            let probe = tokio::time::timeout(self.pipeline.retrieval_timeout(), self.model.health_check(&model_id)).await;
            self.health.record_probe(&model_id, matches!(probe, Ok(Ok(true))));
        });
        futures::future::join_all(probes).await;

        let memory_probe = async {
            matches!(
                tokio::time::timeout(self.memory_timeout(), self.memory.health_check()).await,
                Ok(Ok(true))
            )
        };
        let (similarity_store_reachable, memory_store_reachable) =
            futures::join!(self.retrieval.health_check(), memory_probe);

        let models = self.health.snapshot();
        let pipeline_available = models.values().any(|h| h.healthy != Some(false));

        HealthStatus {
            pipeline_available,
            models,
            similarity_store_reachable,
            memory_store_reachable,
        }
    }
}

impl History {
    fn unavailable(reason: String) -> Self {
        let err = AgentError::MemoryUnavailable(reason);
        warn!("Continuing without memory: {}", err);
        Self {
            note: Some(DegradedNote::new(PipelineStage::Memory, err.to_string())),
            ..Self::default()
        }
    }
}

/// Add keywords from related prior queries for the retry search
fn widen_keywords(search_keywords: &mut Vec<String>, related: &[ScoredMemory]) {
    for memory in related {
        for keyword in keywords::extract(&memory.entry.query_text) {
            if !search_keywords.contains(&keyword) {
                search_keywords.push(keyword);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_is_bounded() {
        assert_eq!(evaluate(0.8, 0.7, 1, 1), Evaluation::Accept);
        assert_eq!(evaluate(0.5, 0.7, 1, 1), Evaluation::Retry);
        assert_eq!(evaluate(0.5, 0.7, 2, 1), Evaluation::Exhausted);
        assert_eq!(evaluate(0.5, 0.7, 1, 0), Evaluation::Exhausted);
    }

    #[test]
    fn test_widen_keywords_dedups() {
        let entry = MemoryEntry {
            id: Uuid::new_v4(),
            user_id: "u".into(),
            query_text: "annual leave loading".into(),
            conversation_id: None,
            context_used: MemoryContext {
                domains: vec![],
                strategy: Strategy::Quick,
                doc_ids: vec![],
                confidence: 0.5,
            },
            result_ref: Uuid::new_v4(),
            created_at: Utc::now(),
        };
        let mut kws = vec!["annual".to_string(), "leave".to_string()];
        widen_keywords(&mut kws, &[ScoredMemory { entry, shared_keywords: 2 }]);
        assert_eq!(kws, vec!["annual", "leave", "loading"]);
    }
}
