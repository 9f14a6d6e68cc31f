//! End-to-end tests for ResearchAgent

use crate::agent::{Collaborators, ResearchAgent, SharedResearchAgent};
use crate::config::AgentConfig;
use crate::error::{AgentError, ModelError};
use crate::formatter::citations_consistent;
use crate::llm::{ScriptedModel, ScriptedReply};
use crate::memory::{InMemoryMemoryStore, MemoryStore};
use crate::similarity::{MockSimilarityStore, SearchRequest, SimilarityStore};
use crate::types::*;
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LEAVE_QUERY: &str = "What is the minimum annual leave entitlement?";

fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.pipeline.retrieval_timeout_ms = 100;
    config.pipeline.model_timeout_ms = 100;
    config.models.model_ids = vec!["primary".to_string(), "secondary".to_string()];
    config
}

fn doc(id: &str, title: &str, excerpt: &str, score: f32, source_type: SourceType) -> RetrievedDocument {
    RetrievedDocument {
        doc_id: id.to_string(),
        title: title.to_string(),
        excerpt: excerpt.to_string(),
        relevance_score: score,
        source_type,
    }
}

fn leave_doc() -> RetrievedDocument {
    doc(
        "fwa-s87",
        "Fair Work Act s 87: annual leave",
        "For each year of service an employee is entitled to 4 weeks of paid annual leave.",
        0.9,
        SourceType::Statute,
    )
}

fn legal_docs() -> Vec<RetrievedDocument> {
    vec![
        leave_doc(),
        doc(
            "rta-s84",
            "Residential Tenancies Act s 84",
            "A tenant who breaks a lease early may owe the landlord a break fee.",
            0.85,
            SourceType::Statute,
        ),
        doc(
            "fwa-s117",
            "Fair Work Act s 117",
            "An employer must give an employee written notice of termination.",
            0.8,
            SourceType::Statute,
        ),
        doc(
            "acl-s54",
            "Australian Consumer Law s 54",
            "Goods supplied to a consumer must be of acceptable quality.",
            0.75,
            SourceType::Statute,
        ),
    ]
}

struct Harness {
    agent: SharedResearchAgent,
    model: Arc<ScriptedModel>,
    memory: Arc<InMemoryMemoryStore>,
}

fn harness_with(config: &AgentConfig, docs: Vec<RetrievedDocument>, model: ScriptedModel) -> Harness {
    let model = Arc::new(model);
    let memory = Arc::new(InMemoryMemoryStore::new(100, None));
    let agent = ResearchAgent::new(
        config,
        Collaborators {
            semantic: Arc::new(MockSimilarityStore::new(docs)),
            keyword: None,
            model: model.clone(),
            memory: memory.clone(),
        },
    );
    Harness { agent, model, memory }
}

fn harness(docs: Vec<RetrievedDocument>, model: ScriptedModel) -> Harness {
    harness_with(&test_config(), docs, model)
}

fn markers(text: &str) -> Vec<usize> {
    Regex::new(r"\[(\d+)\]")
        .unwrap()
        .captures_iter(text)
        .map(|c| c[1].parse().unwrap())
        .collect()
}

fn assert_no_orphans(response: &AgentResponse) {
    assert!(citations_consistent(&response.answer_text, &response.citation_map));
    let used = markers(&response.answer_text);
    for number in response.citation_map.keys() {
        assert!(used.contains(number), "citation {} never referenced", number);
    }
    for number in &used {
        assert!(response.citation_map.contains_key(number), "marker [{}] has no entry", number);
    }
    let numbers: Vec<usize> = response.citations.iter().map(|c| c.number).collect();
    assert_eq!(numbers, (1..=response.citations.len()).collect::<Vec<_>>());
}

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

struct BrokenMemory;

#[async_trait]
impl MemoryStore for BrokenMemory {
    async fn append(&self, _entry: &MemoryEntry) -> Result<()> {
        anyhow::bail!("memory API error 503")
    }

    async fn recent(&self, _user_id: &str, _n: usize) -> Result<Vec<MemoryEntry>> {
        anyhow::bail!("memory API error 503")
    }

    async fn similar(&self, _user_id: &str, _query_text: &str, _k: usize) -> Result<Vec<ScoredMemory>> {
        anyhow::bail!("memory API error 503")
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_focused_leave_query_cites_single_source() {
    let h = harness(vec![leave_doc()], ScriptedModel::grounded());

    let response = h
        .agent
        .answer(Query::new(LEAVE_QUERY).with_strategy(Strategy::Focused))
        .await
        .unwrap();

    assert_eq!(response.strategy_used, Strategy::Focused);
    assert_eq!(response.citations.len(), 1);
    assert_eq!(markers(&response.answer_text), vec![1]);
    assert_eq!(response.citation_map.keys().copied().collect::<Vec<_>>(), vec![1]);
    assert_eq!(response.citations[0].source_ref.doc_id, "fwa-s87");
    assert!(response.confidence >= 0.7, "confidence {}", response.confidence);
    assert_eq!(response.metadata.attempts, 1);
    assert_eq!(response.metadata.model_used.as_deref(), Some("primary"));
    assert!(!response.is_degraded());
    assert!((2..=4).contains(&response.follow_up_suggestions.len()));
    assert!((2..=4).contains(&response.related_queries.len()), "{:?}", response.related_queries);
    assert_no_orphans(&response);
}

#[tokio::test]
async fn test_analyzer_routes_leave_query_to_focused() {
    let h = harness(vec![leave_doc()], ScriptedModel::grounded());
    let response = h.agent.answer(Query::new(LEAVE_QUERY)).await.unwrap();
    assert_eq!(response.strategy_used, Strategy::Focused);
    assert_eq!(response.citations.len(), 1);
}

#[tokio::test]
async fn test_zero_documents_degrades_without_citations() {
    let h = harness(vec![], ScriptedModel::grounded());

    let response = h.agent.answer(Query::new(LEAVE_QUERY)).await.unwrap();

    assert!(response.citations.is_empty());
    assert!(response.citation_map.is_empty());
    assert!(markers(&response.answer_text).is_empty());
    assert!(!response.answer_text.is_empty());
    assert!(response.confidence < 0.7);
    assert!(response
        .reasoning_chain
        .iter()
        .any(|s| s.is_degraded() && s.text.starts_with(ReasoningStep::DEGRADED_MARKER)));
    assert_eq!(response.metadata.attempts, 2);
}

#[tokio::test]
async fn test_similarity_store_outage_is_soft() {
    let model = Arc::new(ScriptedModel::grounded());
    let agent = ResearchAgent::new(
        &test_config(),
        Collaborators {
            semantic: Arc::new(DownStore),
            keyword: Some(Arc::new(DownStore)),
            model: model.clone(),
            memory: Arc::new(InMemoryMemoryStore::new(100, None)),
        },
    );

    let response = agent.answer(Query::new("Can my landlord keep my bond?")).await.unwrap();

    assert!(response.citations.is_empty());
    assert!(response
        .metadata
        .degraded
        .iter()
        .any(|n| n.stage == PipelineStage::Retrieval && n.reason.contains("unavailable")));
    assert!(response.reasoning_chain[0].is_degraded());
    assert!(!agent.status().await.similarity_store_reachable);
}

#[tokio::test]
async fn test_primary_timeout_uses_secondary() {
    let baseline = harness(vec![leave_doc()], ScriptedModel::grounded());
    let baseline = baseline.agent.answer(Query::new(LEAVE_QUERY)).await.unwrap();

    let h = harness(
        vec![leave_doc()],
        ScriptedModel::grounded().with_reply("primary", ScriptedReply::Hang),
    );
    let response = h.agent.answer(Query::new(LEAVE_QUERY)).await.unwrap();

    assert_eq!(response.metadata.model_used.as_deref(), Some("secondary"));
    assert_eq!(response.answer_text, baseline.answer_text);
    assert_eq!(response.citations.len(), 1);
    assert!(response.confidence < baseline.confidence);
    assert!(response.confidence >= 0.7);
    assert_eq!(h.model.calls(), vec!["primary", "secondary"]);

    let status = h.agent.status().await;
    assert_eq!(status.models["primary"].healthy, Some(false));
    assert_eq!(status.models["secondary"].healthy, Some(true));
    assert!(status.pipeline_available);
}

#[tokio::test]
async fn test_all_models_failing_gives_single_degraded_step() {
    let h = harness(
        vec![leave_doc()],
        ScriptedModel::new(ScriptedReply::Fail(ModelError::Http {
            status: 503,
            body: "overloaded".into(),
        })),
    );

    let response = h.agent.answer(Query::new(LEAVE_QUERY)).await.unwrap();

    assert!(response.citations.is_empty());
    assert_eq!(response.reasoning_chain.len(), 1);
    assert!(response.reasoning_chain[0].is_degraded());
    assert!(response.confidence <= 0.3);
    assert!(response.metadata.model_used.is_none());
}

#[tokio::test]
async fn test_retry_is_bounded_by_budget() {
    let mut config = test_config();
    config.pipeline.retry_budget = 2;
    let h = harness_with(
        &config,
        vec![],
        ScriptedModel::new(ScriptedReply::Fail(ModelError::Transport("down".into()))),
    );

    let response = h.agent.answer(Query::new(LEAVE_QUERY)).await.unwrap();

    assert_eq!(response.metadata.attempts, 3);
    // two models per attempt
    assert_eq!(h.model.calls().len(), 6);
}

#[tokio::test]
async fn test_retry_broadens_strategy() {
    let low_relevance = doc(
        "fwo-guide",
        "Fair Work Ombudsman guide: annual leave",
        "Full-time employees get 4 weeks of annual leave each year.",
        0.6,
        SourceType::Guidance,
    );
    let h = harness(vec![leave_doc(), low_relevance], ScriptedModel::grounded());
    // Focused excludes the guide, so the first attempt is already confident
    let response = h.agent.answer(Query::new(LEAVE_QUERY)).await.unwrap();
    assert_eq!(response.metadata.attempts, 1);

    let h = harness(vec![low_relevance_only()], ScriptedModel::grounded());
    let response = h.agent.answer(Query::new(LEAVE_QUERY)).await.unwrap();
    assert_eq!(response.metadata.attempts, 2);
    assert_eq!(response.strategy_used, Strategy::Comprehensive);
    assert_eq!(response.citations.len(), 1);
}

fn low_relevance_only() -> RetrievedDocument {
    doc(
        "fwa-s88",
        "Fair Work Act s 88: taking annual leave",
        "Paid annual leave may be taken for a period agreed between an employee and the employer.",
        0.55,
        SourceType::Statute,
    )
}

#[tokio::test]
async fn test_citations_have_no_orphans_with_untrusted_draft() {
    let draft = "STEP: Several sources apply.\n\
                 ANSWER: Leases can be broken [G2] [4]. Leave is four weeks [G1][G1]. \
                 Notice is required [G9]. See the 1893 decision [1893] and [2019]. Quality is guaranteed [G3, G2].";
    let h = harness(legal_docs(), ScriptedModel::new(ScriptedReply::Text(draft.into())));

    let response = h
        .agent
        .answer(
            Query::new("Can I break my lease, what leave am I owed and can I get a refund for faulty goods?")
                .with_strategy(Strategy::Exploratory),
        )
        .await
        .unwrap();

    assert!(!response.citations.is_empty());
    assert!(!response.answer_text.contains("[G"));
    assert!(response.answer_text.contains("(1893) and (2019)"));
    assert!(!markers(&response.answer_text).contains(&1893));
    assert_no_orphans(&response);
}

#[tokio::test]
async fn test_same_inputs_same_response() {
    let run = || async {
        let h = harness(legal_docs(), ScriptedModel::grounded());
        h.agent
            .answer(Query::new("Can my employer refuse my annual leave request?"))
            .await
            .unwrap()
    };
    let a = run().await;
    let b = run().await;

    assert_eq!(a.confidence, b.confidence);
    assert_eq!(a.answer_text, b.answer_text);
    assert_eq!(a.citation_map, b.citation_map);
    assert_eq!(a.reasoning_chain, b.reasoning_chain);
}

#[tokio::test]
async fn test_related_prior_query_from_memory() {
    let h = harness(vec![leave_doc()], ScriptedModel::grounded());

    h.agent.answer(Query::new(LEAVE_QUERY).for_user("alice")).await.unwrap();
    let second = h
        .agent
        .answer(Query::new("How is the annual leave entitlement calculated for part-time staff?").for_user("alice"))
        .await
        .unwrap();

    assert_eq!(second.related_queries.first().map(String::as_str), Some(LEAVE_QUERY));
    assert_eq!(h.memory.recent("alice", 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_memory_is_isolated_between_users() {
    let h = harness(vec![leave_doc()], ScriptedModel::grounded());

    h.agent.answer(Query::new(LEAVE_QUERY).for_user("alice")).await.unwrap();
    let bob = h
        .agent
        .answer(Query::new("How is the annual leave entitlement calculated for part-time staff?").for_user("bob"))
        .await
        .unwrap();

    assert!(!bob.related_queries.iter().any(|q| q == LEAVE_QUERY));
    let bob_entries = h.memory.recent("bob", 10).await.unwrap();
    assert!(bob_entries.iter().all(|e| e.user_id == "bob"));
}

#[tokio::test]
async fn test_memory_outage_is_skipped() {
    let agent = ResearchAgent::new(
        &test_config(),
        Collaborators {
            semantic: Arc::new(MockSimilarityStore::new(vec![leave_doc()])),
            keyword: None,
            model: Arc::new(ScriptedModel::grounded()),
            memory: Arc::new(BrokenMemory),
        },
    );

    let response = agent.answer(Query::new(LEAVE_QUERY).for_user("alice")).await.unwrap();

    assert_eq!(response.citations.len(), 1);
    assert!(response.metadata.degraded.iter().any(|n| n.stage == PipelineStage::Memory));
    assert!(!agent.status().await.memory_store_reachable);
}

#[tokio::test]
async fn test_cancellation_discards_run() {
    let mut config = test_config();
    config.pipeline.model_timeout_ms = 10_000;
    let h = harness_with(&config, vec![leave_doc()], ScriptedModel::new(ScriptedReply::Hang));

    let token = CancellationToken::new();
    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let result = h
        .agent
        .answer_with_cancellation(Query::new(LEAVE_QUERY).for_user("alice"), token)
        .await;

    assert!(matches!(result, Err(AgentError::Cancelled)));
    assert!(h.memory.recent("alice", 10).await.unwrap().is_empty());
}

#[test]
fn test_empty_query_rejected() {
    let h = harness(vec![leave_doc()], ScriptedModel::grounded());
    let result = tokio_test::block_on(h.agent.answer(Query::new("   ")));
    assert!(matches!(result, Err(AgentError::EmptyQuery)));
    assert!(h.model.calls().is_empty());
}

#[tokio::test]
async fn test_status_probes_unobserved_models() {
    let h = harness(vec![leave_doc()], ScriptedModel::grounded());
    let status = h.agent.status().await;

    assert!(status.pipeline_available);
    assert!(status.similarity_store_reachable);
    assert!(status.memory_store_reachable);
    assert_eq!(status.models.len(), 2);
    assert!(status.models.values().all(|m| m.healthy == Some(true)));
}

#[tokio::test]
async fn test_status_probes_each_model_separately() {
    let model = ScriptedModel::grounded()
        .with_reply("primary", ScriptedReply::Fail(ModelError::Http { status: 401, body: "unauthorized".into() }));
    let h = harness(vec![leave_doc()], model);
    let status = h.agent.status().await;

    assert_eq!(status.models["primary"].healthy, Some(false));
    assert_eq!(status.models["secondary"].healthy, Some(true));
    assert!(status.pipeline_available);
}
